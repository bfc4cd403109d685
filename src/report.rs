use std::collections::BTreeMap;

use crate::domain::MergedRecord;

pub const UNCATEGORIZED: &str = "Uncategorized";

/// Records partitioned by disease category, keyed by display label.
pub type GroupedReport = BTreeMap<String, Vec<MergedRecord>>;

/// The listing wraps categories in bracket markers (`[Breast]`); the label drops them.
pub fn category_label(raw: &str) -> String {
    let label = raw
        .chars()
        .filter(|ch| *ch != '[' && *ch != ']')
        .collect::<String>();
    let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
    if label.is_empty() {
        return UNCATEGORIZED.to_string();
    }
    label
}

/// Partitions `records` by category label, keeping input order within each partition. Only
/// categories that actually receive a record appear in the result.
pub fn group(records: &[MergedRecord]) -> GroupedReport {
    let mut grouped = GroupedReport::new();
    for record in records {
        grouped
            .entry(category_label(&record.disease_category))
            .or_default()
            .push(record.clone());
    }
    grouped
}
