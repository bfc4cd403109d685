use std::collections::{HashMap, HashSet};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::ctgov::CtgovClient;
use crate::domain::{ListingRow, MergedRecord, ResolutionOutcome, UnresolvedLog, UnresolvedReason};
use crate::error::TrialError;
use crate::normalize::{NormalizedId, Normalizer};
use crate::resolver::DetailResolver;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub merged: Vec<MergedRecord>,
    pub unresolved: UnresolvedLog,
    /// Open rows considered by the batch.
    pub open_rows: usize,
    /// Distinct identifiers sent to the resolver.
    pub lookups: usize,
}

impl BatchResult {
    pub fn into_parts(self) -> (Vec<MergedRecord>, UnresolvedLog) {
        (self.merged, self.unresolved)
    }
}

pub struct Aggregator<C: CtgovClient> {
    normalizer: Normalizer,
    resolver: DetailResolver<C>,
    concurrency: usize,
}

impl<C: CtgovClient> Aggregator<C> {
    pub fn new(normalizer: Normalizer, resolver: DetailResolver<C>, concurrency: usize) -> Self {
        Self {
            normalizer,
            resolver,
            concurrency: concurrency.max(1),
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn resolver(&self) -> &DetailResolver<C> {
        &self.resolver
    }

    /// Resolves every open row and joins the results back onto the listing.
    ///
    /// Rows that normalize to the same identifier share one lookup. Merged records come back in
    /// listing order whatever order the lookups finish in, and every open row lands either in
    /// `merged` or in `unresolved`.
    pub fn aggregate(
        &self,
        rows: &[ListingRow],
        sink: &dyn ProgressSink,
    ) -> Result<BatchResult, TrialError> {
        let open = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.status.is_open())
            .map(|(index, row)| (index, row, self.normalizer.normalize(&row.study_id)))
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        let keys = open
            .iter()
            .filter(|(_, _, id)| !id.is_invalid())
            .filter(|(_, _, id)| seen.insert(id.clone()))
            .map(|(_, _, id)| id.clone())
            .collect::<Vec<_>>();

        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; {} open of {} listed, {} lookups",
                open.len(),
                rows.len(),
                keys.len()
            ),
            elapsed: None,
        });
        for id in keys.iter().filter(|id| id.is_composite()) {
            warn!(%id, "composite identifier has no alias; looking it up verbatim");
        }

        let outcomes = self.resolve_all(&keys, sink)?;
        let outcomes = keys
            .iter()
            .cloned()
            .zip(outcomes)
            .collect::<HashMap<NormalizedId, ResolutionOutcome>>();

        let mut merged = Vec::new();
        let mut unresolved = UnresolvedLog::new();
        for (index, row, id) in &open {
            if id.is_invalid() {
                warn!(index, raw = %row.study_id, "unusable identifier, skipping lookup");
                unresolved.push(*index, &row.study_id, UnresolvedReason::InvalidIdentifier);
                continue;
            }
            match outcomes.get(id) {
                Some(ResolutionOutcome::Found(detail)) => {
                    merged.push(MergedRecord::new(*index, row, id.clone(), detail.clone()));
                }
                Some(ResolutionOutcome::NotFound) | None => {
                    unresolved.push(*index, &row.study_id, UnresolvedReason::NotFound);
                }
                Some(ResolutionOutcome::TransientError(reason)) => {
                    unresolved.push(
                        *index,
                        &row.study_id,
                        UnresolvedReason::RetriesExhausted(reason.clone()),
                    );
                }
            }
        }
        merged.sort_by_key(|record| record.listing_index);

        info!(
            open = open.len(),
            lookups = keys.len(),
            merged = merged.len(),
            unresolved = unresolved.len(),
            "batch complete"
        );
        Ok(BatchResult {
            merged,
            unresolved,
            open_rows: open.len(),
            lookups: keys.len(),
        })
    }

    fn resolve_all(
        &self,
        keys: &[NormalizedId],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ResolutionOutcome>, TrialError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|idx| format!("trial-lookup-{idx}"))
            .build()
            .map_err(|err| TrialError::WorkerPool(err.to_string()))?;

        // Indexed collect keeps the key order regardless of completion order.
        let outcomes = pool.install(|| {
            keys.par_iter()
                .with_max_len(1)
                .map(|id| {
                    let start = Instant::now();
                    let outcome = self.resolver.resolve(id);
                    debug!(%id, outcome = outcome_label(&outcome), "resolved");
                    sink.event(ProgressEvent {
                        message: format!("ctgov.lookup id={id} outcome={}", outcome_label(&outcome)),
                        elapsed: Some(start.elapsed()),
                    });
                    outcome
                })
                .collect::<Vec<_>>()
        });
        Ok(outcomes)
    }
}

fn outcome_label(outcome: &ResolutionOutcome) -> &'static str {
    match outcome {
        ResolutionOutcome::Found(_) => "found",
        ResolutionOutcome::NotFound => "not_found",
        ResolutionOutcome::TransientError(_) => "failed",
    }
}
