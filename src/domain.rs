use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedId;

const TRIAL_LINK_BASE: &str = "https://clinicaltrials.gov/ct2/show";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    OpenToAccrual,
    Closed,
    Other,
}

impl TrialStatus {
    pub fn is_open(self) -> bool {
        matches!(self, TrialStatus::OpenToAccrual)
    }

    /// Listing status text is free-form; anything that is neither open nor closed is `Other`.
    pub fn from_listing_text(value: &str) -> Self {
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.eq_ignore_ascii_case("open to accrual") {
            return TrialStatus::OpenToAccrual;
        }
        if normalized.to_ascii_lowercase().contains("closed") {
            return TrialStatus::Closed;
        }
        TrialStatus::Other
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialStatus::OpenToAccrual => write!(f, "Open to Accrual"),
            TrialStatus::Closed => write!(f, "Closed"),
            TrialStatus::Other => write!(f, "Other"),
        }
    }
}

impl FromStr for TrialStatus {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_listing_text(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRow {
    pub study_id: String,
    pub disease_category: String,
    pub status: TrialStatus,
}

impl ListingRow {
    pub fn new(study_id: &str, disease_category: &str, status: TrialStatus) -> Self {
        Self {
            study_id: study_id.to_string(),
            disease_category: disease_category.to_string(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub nct_id: String,
    pub official_title: String,
    pub brief_summary: String,
    pub eligibility_criteria: String,
    pub phase: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedRecord {
    pub listing_index: usize,
    pub study_id: String,
    pub normalized_id: NormalizedId,
    pub disease_category: String,
    pub status: TrialStatus,
    pub detail: DetailRecord,
    pub enrolled: Option<String>,
    pub planned: Option<String>,
}

impl MergedRecord {
    pub fn new(
        listing_index: usize,
        row: &ListingRow,
        normalized_id: NormalizedId,
        detail: DetailRecord,
    ) -> Self {
        Self {
            listing_index,
            study_id: row.study_id.clone(),
            normalized_id,
            disease_category: row.disease_category.clone(),
            status: row.status,
            detail,
            enrolled: None,
            planned: None,
        }
    }

    pub fn link(&self) -> String {
        format!("{TRIAL_LINK_BASE}/{}", self.detail.nct_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Found(DetailRecord),
    NotFound,
    TransientError(String),
}

impl ResolutionOutcome {
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolutionOutcome::TransientError(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UnresolvedReason {
    InvalidIdentifier,
    NotFound,
    RetriesExhausted(String),
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedReason::InvalidIdentifier => write!(f, "invalid identifier"),
            UnresolvedReason::NotFound => write!(f, "no matching study"),
            UnresolvedReason::RetriesExhausted(reason) => {
                write!(f, "lookup failed after retries: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedEntry {
    pub listing_index: usize,
    pub study_id: String,
    pub reason: UnresolvedReason,
}

/// Identifiers that could not be resolved, in listing order. Entries are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnresolvedLog {
    entries: Vec<UnresolvedEntry>,
}

impl UnresolvedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listing_index: usize, study_id: &str, reason: UnresolvedReason) {
        self.entries.push(UnresolvedEntry {
            listing_index,
            study_id: study_id.to_string(),
            reason,
        });
    }

    pub fn entries(&self) -> &[UnresolvedEntry] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.study_id.as_str())
            .collect()
    }

    pub fn contains(&self, study_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.study_id == study_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listing_status() {
        assert_eq!(
            "Open to Accrual".parse::<TrialStatus>().unwrap(),
            TrialStatus::OpenToAccrual
        );
        assert_eq!(
            " open  to accrual ".parse::<TrialStatus>().unwrap(),
            TrialStatus::OpenToAccrual
        );
        assert_eq!(
            "Closed to Accrual".parse::<TrialStatus>().unwrap(),
            TrialStatus::Closed
        );
        assert_eq!(
            "Temporarily Closed".parse::<TrialStatus>().unwrap(),
            TrialStatus::Closed
        );
        assert_eq!(
            "Active, not recruiting".parse::<TrialStatus>().unwrap(),
            TrialStatus::Other
        );
    }

    #[test]
    fn unresolved_log_keeps_append_order() {
        let mut log = UnresolvedLog::new();
        log.push(3, "NRG-B", UnresolvedReason::NotFound);
        log.push(1, "NRG-A", UnresolvedReason::InvalidIdentifier);
        assert_eq!(log.ids(), vec!["NRG-B", "NRG-A"]);
        assert!(log.contains("NRG-A"));
        assert_eq!(log.len(), 2);
    }
}
