use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;

use trial_digest::aggregate::Aggregator;
use trial_digest::app::{ProgressEvent, ProgressSink};
use trial_digest::config::default_aliases;
use trial_digest::ctgov::CtgovClient;
use trial_digest::domain::{
    DetailRecord, ListingRow, ResolutionOutcome, TrialStatus, UnresolvedReason,
};
use trial_digest::normalize::{NormalizedId, Normalizer};
use trial_digest::report::group;
use trial_digest::resolver::{DetailResolver, RetryPolicy};

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Answers from a per-identifier script; identifiers without a script are not found.
#[derive(Default)]
struct StubCtgov {
    scripts: HashMap<String, Vec<ResolutionOutcome>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StubCtgov {
    fn found(mut self, id: &str, nct_id: &str) -> Self {
        self.scripts
            .insert(id.to_string(), vec![ResolutionOutcome::Found(record(nct_id))]);
        self
    }

    fn script(mut self, id: &str, outcomes: Vec<ResolutionOutcome>) -> Self {
        self.scripts.insert(id.to_string(), outcomes);
        self
    }

    fn delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl CtgovClient for StubCtgov {
    fn fetch_study(&self, id: &NormalizedId) -> ResolutionOutcome {
        if let Some(delay) = self.delays.get(id.as_str()) {
            thread::sleep(*delay);
        }
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(id.as_str().to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };
        match self.scripts.get(id.as_str()) {
            Some(script) => script
                .get(attempt)
                .or_else(|| script.last())
                .cloned()
                .unwrap_or(ResolutionOutcome::NotFound),
            None => ResolutionOutcome::NotFound,
        }
    }
}

fn record(nct_id: &str) -> DetailRecord {
    DetailRecord {
        nct_id: nct_id.to_string(),
        official_title: format!("Official title for {nct_id}"),
        brief_summary: "Brief summary".to_string(),
        eligibility_criteria: "Inclusion Criteria: adults".to_string(),
        phase: vec!["Phase 3".to_string()],
    }
}

fn open(id: &str, category: &str) -> ListingRow {
    ListingRow::new(id, category, TrialStatus::OpenToAccrual)
}

fn aggregator(stub: StubCtgov, concurrency: usize) -> Aggregator<StubCtgov> {
    Aggregator::new(
        Normalizer::new(default_aliases()),
        DetailResolver::new(stub, RetryPolicy::immediate(2)),
        concurrency,
    )
}

#[test]
fn closed_rows_are_filtered_before_lookup() {
    let stub = StubCtgov::default().found("NRG-XX1", "NCT00000001");
    let aggregator = aggregator(stub, 2);
    let rows = vec![
        open("NRG-XX1", "[Lung]"),
        ListingRow::new("NRG-XX2", "[Lung]", TrialStatus::Closed),
    ];

    let batch = aggregator.aggregate(&rows, &NoopSink).unwrap();
    let stub = aggregator.resolver().client();
    assert_eq!(stub.calls("NRG-XX1"), 1);
    assert_eq!(stub.calls("NRG-XX2"), 0);
    assert!(batch.unresolved.is_empty());

    let grouped = group(&batch.merged);
    assert_eq!(grouped.len(), 1);
    let lung = &grouped["Lung"];
    assert_eq!(lung.len(), 1);
    assert_eq!(lung[0].study_id, "NRG-XX1");
    assert_eq!(lung[0].detail.nct_id, "NCT00000001");
}

#[test]
fn not_found_row_lands_in_unresolved_log() {
    let aggregator = aggregator(StubCtgov::default(), 2);
    let rows = vec![open("NRG-YY1", "[Breast]")];

    let batch = aggregator.aggregate(&rows, &NoopSink).unwrap();
    assert!(batch.merged.is_empty());
    assert!(!group(&batch.merged).contains_key("Breast"));
    assert_eq!(batch.unresolved.ids(), vec!["NRG-YY1"]);
    assert_eq!(
        batch.unresolved.entries()[0].reason,
        UnresolvedReason::NotFound
    );
}

#[test]
fn every_open_row_is_merged_or_unresolved_exactly_once() {
    let stub = StubCtgov::default()
        .found("NRG-A", "NCT1")
        .found("NRG-C", "NCT3")
        .script(
            "NRG-D",
            vec![ResolutionOutcome::TransientError("503".to_string())],
        )
        .found("S1610", "NCT02997228");
    let aggregator = aggregator(stub, 4);
    let rows = vec![
        open("NRG-A", "[Lung]"),
        open("NRG-B", "[Lung]"),
        ListingRow::new("NRG-Z", "[Lung]", TrialStatus::Other),
        open("NRG-C", "[Breast]"),
        open("  ", "[Breast]"),
        open("NRG-D", "[GI]"),
        open("NRG-GI004/SWOG-S1610", "[GI]"),
    ];

    let batch = aggregator.aggregate(&rows, &NoopSink).unwrap();
    assert_eq!(batch.open_rows, 6);

    let merged = batch
        .merged
        .iter()
        .map(|record| record.study_id.as_str())
        .collect::<Vec<_>>();
    let unresolved = batch.unresolved.ids();
    for row in rows.iter().filter(|row| row.status.is_open()) {
        let in_merged = merged.iter().filter(|id| **id == row.study_id).count();
        let in_unresolved = unresolved.iter().filter(|id| **id == row.study_id).count();
        assert_eq!(in_merged + in_unresolved, 1, "row {:?}", row.study_id);
    }
    assert!(!merged.contains(&"NRG-Z") && !unresolved.contains(&"NRG-Z"));

    let reasons = batch
        .unresolved
        .entries()
        .iter()
        .map(|entry| (entry.study_id.as_str(), entry.reason.clone()))
        .collect::<HashMap<_, _>>();
    assert_eq!(reasons["NRG-B"], UnresolvedReason::NotFound);
    assert_eq!(reasons["  "], UnresolvedReason::InvalidIdentifier);
    assert_matches!(&reasons["NRG-D"], UnresolvedReason::RetriesExhausted(reason) if reason == "503");
}

#[test]
fn invalid_identifiers_skip_the_lookup_service() {
    let aggregator = aggregator(StubCtgov::default(), 1);
    let rows = vec![open("", "[Lung]"), open("[ ]", "[Lung]")];

    let batch = aggregator.aggregate(&rows, &NoopSink).unwrap();
    assert_eq!(aggregator.resolver().client().total_calls(), 0);
    assert_eq!(batch.lookups, 0);
    assert_eq!(batch.unresolved.len(), 2);
}

#[test]
fn merged_output_follows_listing_order_not_completion_order() {
    let ids = [
        "NRG-A", "NRG-B", "NRG-C", "NRG-D", "NRG-E", "NRG-F", "NRG-G", "NRG-H",
    ];
    let mut stub = StubCtgov::default();
    for (index, id) in ids.iter().enumerate() {
        // Earlier rows answer later.
        let delay = Duration::from_millis(((ids.len() - index) * 15) as u64);
        stub = stub.found(id, &format!("NCT{index:08}")).delay(id, delay);
    }
    let aggregator = aggregator(stub, 4);
    let rows = ids
        .iter()
        .enumerate()
        .map(|(index, id)| open(id, if index % 2 == 0 { "[Lung]" } else { "[Gyn]" }))
        .collect::<Vec<_>>();

    let batch = aggregator.aggregate(&rows, &NoopSink).unwrap();
    let merged = batch
        .merged
        .iter()
        .map(|record| record.study_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(merged, ids.to_vec());
    let indexes = batch
        .merged
        .iter()
        .map(|record| record.listing_index)
        .collect::<Vec<_>>();
    assert_eq!(indexes, (0..ids.len()).collect::<Vec<_>>());

    let grouped = group(&batch.merged);
    let lung = grouped["Lung"]
        .iter()
        .map(|record| record.study_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(lung, vec!["NRG-A", "NRG-C", "NRG-E", "NRG-G"]);
}

#[test]
fn rows_sharing_a_key_trigger_one_lookup() {
    let stub = StubCtgov::default().found("S1610", "NCT02997228");
    let aggregator = aggregator(stub, 4);
    let rows = vec![
        open("NRG-GI004/SWOG-S1610", "[GI]"),
        open("[NRG-LU005]", "[Lung]"),
        open("S1610", "[Colorectal]"),
    ];

    let batch = aggregator.aggregate(&rows, &NoopSink).unwrap();
    assert_eq!(aggregator.resolver().client().calls("S1610"), 1);
    assert_eq!(batch.lookups, 2);

    let joined = batch
        .merged
        .iter()
        .map(|record| (record.study_id.as_str(), record.detail.nct_id.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        joined,
        vec![
            ("NRG-GI004/SWOG-S1610", "NCT02997228"),
            ("S1610", "NCT02997228"),
        ]
    );
    assert_eq!(batch.unresolved.ids(), vec!["[NRG-LU005]"]);
}

#[test]
fn transient_then_not_found_within_budget_is_not_dropped() {
    let stub = StubCtgov::default().script(
        "NRG-YY1",
        vec![
            ResolutionOutcome::TransientError("timeout".to_string()),
            ResolutionOutcome::TransientError("502".to_string()),
            ResolutionOutcome::NotFound,
        ],
    );
    let aggregator = aggregator(stub, 1);
    let rows = vec![open("NRG-YY1", "[Breast]")];

    let batch = aggregator.aggregate(&rows, &NoopSink).unwrap();
    assert_eq!(aggregator.resolver().client().calls("NRG-YY1"), 3);
    assert!(batch.merged.is_empty());
    assert_eq!(
        batch.unresolved.entries()[0].reason,
        UnresolvedReason::NotFound
    );
}

#[test]
fn transient_then_found_within_budget_is_merged() {
    let stub = StubCtgov::default().script(
        "NRG-BR007",
        vec![
            ResolutionOutcome::TransientError("malformed payload: missing NCTId".to_string()),
            ResolutionOutcome::Found(record("NCT04852887")),
        ],
    );
    let aggregator = aggregator(stub, 1);
    let rows = vec![open("NRG-BR007", "[Breast]")];

    let batch = aggregator.aggregate(&rows, &NoopSink).unwrap();
    assert_eq!(aggregator.resolver().client().calls("NRG-BR007"), 2);
    assert_eq!(batch.merged.len(), 1);
    assert!(batch.unresolved.is_empty());
}

#[test]
fn exhausted_transient_errors_are_demoted_to_unresolved() {
    let stub = StubCtgov::default().script(
        "NRG-GY018",
        vec![ResolutionOutcome::TransientError("connection reset".to_string())],
    );
    let aggregator = aggregator(stub, 1);
    let rows = vec![open("NRG-GY018", "[Gyn]")];

    let batch = aggregator.aggregate(&rows, &NoopSink).unwrap();
    assert_eq!(aggregator.resolver().client().calls("NRG-GY018"), 3);
    assert_matches!(
        &batch.unresolved.entries()[0].reason,
        UnresolvedReason::RetriesExhausted(reason) if reason == "connection reset"
    );
}
