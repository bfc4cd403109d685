use std::time::{Duration, Instant};

use serde::Serialize;

use crate::aggregate::Aggregator;
use crate::config::ResolvedConfig;
use crate::ctgov::CtgovClient;
use crate::domain::{DetailRecord, ListingRow, ResolutionOutcome, UnresolvedEntry, UnresolvedLog};
use crate::error::TrialError;
use crate::normalize::{NormalizedId, Normalizer};
use crate::output::ReportWriter;
use crate::report::{self, GroupedReport};
use crate::resolver::DetailResolver;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives progress events; lookups report from worker threads.
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct Digest {
    pub grouped: GroupedReport,
    pub unresolved: UnresolvedLog,
    pub listed: usize,
    pub open_rows: usize,
    pub lookups: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub listed: usize,
    pub open_rows: usize,
    pub lookups: usize,
    pub merged: usize,
    pub categories: Vec<CategorySummary>,
    pub unresolved: Vec<UnresolvedEntry>,
    pub written: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub label: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub study_id: String,
    pub normalized_id: NormalizedId,
    pub query_url_value: String,
    pub status: LookupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<DetailRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Found,
    NotFound,
    Failed,
}

pub struct App<C: CtgovClient> {
    aggregator: Aggregator<C>,
}

impl<C: CtgovClient> App<C> {
    pub fn new(config: &ResolvedConfig, client: C) -> Self {
        let normalizer = Normalizer::new(config.aliases.clone());
        let resolver = DetailResolver::new(client, config.retry);
        Self {
            aggregator: Aggregator::new(normalizer, resolver, config.concurrency),
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        self.aggregator.normalizer()
    }

    /// Resolves the listing and groups the merged records, without writing anything.
    pub fn digest(
        &self,
        rows: &[ListingRow],
        sink: &dyn ProgressSink,
    ) -> Result<Digest, TrialError> {
        if rows.is_empty() {
            return Err(TrialError::EmptyListing);
        }
        let start = Instant::now();
        let batch = self.aggregator.aggregate(rows, sink)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Group; {} merged, {} unresolved",
                batch.merged.len(),
                batch.unresolved.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        let open_rows = batch.open_rows;
        let lookups = batch.lookups;
        let (merged, unresolved) = batch.into_parts();
        Ok(Digest {
            grouped: report::group(&merged),
            unresolved,
            listed: rows.len(),
            open_rows,
            lookups,
        })
    }

    pub fn run(
        &self,
        rows: &[ListingRow],
        writer: &mut dyn ReportWriter,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, TrialError> {
        let digest = self.digest(rows, sink)?;

        sink.event(ProgressEvent {
            message: "phase=Write; writing report".to_string(),
            elapsed: None,
        });
        for (label, records) in &digest.grouped {
            writer.write_partition(label, records)?;
        }
        writer.write_unresolved(&digest.unresolved)?;
        let written = writer.finish()?;

        Ok(RunResult {
            listed: digest.listed,
            open_rows: digest.open_rows,
            lookups: digest.lookups,
            merged: digest.grouped.values().map(|records| records.len()).sum(),
            categories: digest
                .grouped
                .iter()
                .map(|(label, records)| CategorySummary {
                    label: label.clone(),
                    records: records.len(),
                })
                .collect(),
            unresolved: digest.unresolved.entries().to_vec(),
            written: written.into_iter().map(|path| path.to_string()).collect(),
        })
    }

    /// Looks up a single identifier outside of a batch.
    pub fn lookup(&self, raw: &str) -> Result<LookupResult, TrialError> {
        let id = self.normalizer().normalize(raw);
        if id.is_invalid() {
            return Err(TrialError::InvalidIdentifier(raw.to_string()));
        }
        let (status, record, reason) = match self.aggregator.resolver().resolve(&id) {
            ResolutionOutcome::Found(record) => (LookupStatus::Found, Some(record), None),
            ResolutionOutcome::NotFound => (LookupStatus::NotFound, None, None),
            ResolutionOutcome::TransientError(reason) => (LookupStatus::Failed, None, Some(reason)),
        };
        Ok(LookupResult {
            study_id: raw.to_string(),
            query_url_value: id.query_value(),
            normalized_id: id,
            status,
            record,
            reason,
        })
    }
}
