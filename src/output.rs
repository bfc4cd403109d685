use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::app::{LookupResult, ProgressEvent, ProgressSink, RunResult};
use crate::domain::{MergedRecord, UnresolvedLog};
use crate::error::TrialError;
use crate::report::category_label;

pub const UNRESOLVED_LOG_FILE: &str = "not_available.txt";

/// Downstream consumer of a grouped report: one partition per category, then the unresolved
/// identifiers, then `finish`.
pub trait ReportWriter {
    fn write_partition(&mut self, label: &str, records: &[MergedRecord])
    -> Result<(), TrialError>;
    fn write_unresolved(&mut self, log: &UnresolvedLog) -> Result<(), TrialError>;
    /// Flushes everything and returns the paths that were written.
    fn finish(&mut self) -> Result<Vec<Utf8PathBuf>, TrialError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    #[serde(rename = "NRG ID")]
    pub study_id: String,
    #[serde(rename = "NCT ID")]
    pub nct_id: String,
    #[serde(rename = "Disease Category")]
    pub disease_category: String,
    #[serde(rename = "Phase")]
    pub phase: String,
    #[serde(rename = "Planned")]
    pub planned: String,
    #[serde(rename = "Enrolled")]
    pub enrolled: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Brief")]
    pub brief: String,
    #[serde(rename = "Eligibility Criteria")]
    pub eligibility_criteria: String,
    #[serde(rename = "Link")]
    pub link: String,
}

impl From<&MergedRecord> for ReportRow {
    fn from(record: &MergedRecord) -> Self {
        Self {
            study_id: record.study_id.clone(),
            nct_id: record.detail.nct_id.clone(),
            disease_category: category_label(&record.disease_category),
            phase: record.detail.phase.join(", "),
            planned: record.planned.clone().unwrap_or_default(),
            enrolled: record.enrolled.clone().unwrap_or_default(),
            title: record.detail.official_title.clone(),
            brief: record.detail.brief_summary.clone(),
            eligibility_criteria: record.detail.eligibility_criteria.clone(),
            link: record.link(),
        }
    }
}

/// Writes the whole report as one JSON document keyed by category, plus the unresolved log as
/// plain text next to it.
pub struct JsonReportWriter {
    output_dir: Utf8PathBuf,
    report_name: String,
    partitions: serde_json::Map<String, serde_json::Value>,
    unresolved: Vec<String>,
}

impl JsonReportWriter {
    pub fn new(output_dir: &Utf8Path, date: NaiveDate) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            report_name: report_file_name(date),
            partitions: serde_json::Map::new(),
            unresolved: Vec::new(),
        }
    }

    pub fn dated_today(output_dir: &Utf8Path) -> Self {
        Self::new(output_dir, chrono::Local::now().date_naive())
    }

    pub fn report_path(&self) -> Utf8PathBuf {
        self.output_dir.join(&self.report_name)
    }

    pub fn unresolved_path(&self) -> Utf8PathBuf {
        self.output_dir.join(UNRESOLVED_LOG_FILE)
    }
}

impl ReportWriter for JsonReportWriter {
    fn write_partition(
        &mut self,
        label: &str,
        records: &[MergedRecord],
    ) -> Result<(), TrialError> {
        let rows = records.iter().map(ReportRow::from).collect::<Vec<_>>();
        let value =
            serde_json::to_value(rows).map_err(|err| TrialError::Report(err.to_string()))?;
        self.partitions.insert(label.to_string(), value);
        Ok(())
    }

    fn write_unresolved(&mut self, log: &UnresolvedLog) -> Result<(), TrialError> {
        self.unresolved = log
            .entries()
            .iter()
            .map(|entry| format!("{}\t{}", entry.study_id, entry.reason))
            .collect();
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<Utf8PathBuf>, TrialError> {
        fs::create_dir_all(self.output_dir.as_std_path())
            .map_err(|err| TrialError::Filesystem(err.to_string()))?;

        let report_path = self.report_path();
        let document = serde_json::Value::Object(std::mem::take(&mut self.partitions));
        let content = serde_json::to_vec_pretty(&document)
            .map_err(|err| TrialError::Report(err.to_string()))?;
        write_file_atomic(&report_path, &content)?;
        info!(path = %report_path, "report written");
        let mut written = vec![report_path];

        let log_path = self.unresolved_path();
        if self.unresolved.is_empty() {
            if log_path.as_std_path().exists() {
                fs::remove_file(log_path.as_std_path())
                    .map_err(|err| TrialError::Filesystem(err.to_string()))?;
            }
        } else {
            let mut content = self.unresolved.join("\n");
            content.push('\n');
            write_file_atomic(&log_path, content.as_bytes())?;
            info!(path = %log_path, entries = self.unresolved.len(), "unresolved log written");
            written.push(log_path);
        }
        Ok(written)
    }
}

pub fn report_file_name(date: NaiveDate) -> String {
    format!("NRG Open Study {}.json", date.format("%m_%d_%Y"))
}

fn write_file_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), TrialError> {
    let parent = path
        .parent()
        .ok_or_else(|| TrialError::Filesystem("invalid destination path".to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("trial-digest")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| TrialError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| TrialError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| TrialError::Filesystem(err.to_string()))?;
    Ok(())
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_lookup(result: &LookupResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the tracing subscriber.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}", event.message
            ),
            None => info!("{}", event.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_name_is_date_stamped() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(report_file_name(date), "NRG Open Study 03_07_2026.json");
    }
}
