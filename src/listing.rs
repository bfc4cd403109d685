use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{ListingRow, TrialStatus};
use crate::error::TrialError;

const STUDY_COLUMN: &str = "Study";
const CATEGORY_COLUMN: &str = "Disease Category";
const STATUS_COLUMN: &str = "Status";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingFile {
    Rows(Vec<RowEntry>),
    Columns(BTreeMap<String, BTreeMap<String, Value>>),
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    #[serde(alias = "Study", alias = "study_id")]
    study: String,
    #[serde(alias = "Disease Category")]
    disease_category: String,
    #[serde(alias = "Status")]
    status: String,
}

pub fn load_listing(path: &Path) -> Result<Vec<ListingRow>, TrialError> {
    let content =
        fs::read_to_string(path).map_err(|_| TrialError::ListingRead(path.to_path_buf()))?;
    parse_listing(&content)
}

/// Accepts either an array of row objects or the column-oriented table export
/// (`{"Study": {"0": ...}, "Disease Category": {"0": ...}, "Status": {"0": ...}}`).
pub fn parse_listing(content: &str) -> Result<Vec<ListingRow>, TrialError> {
    let file: ListingFile =
        serde_json::from_str(content).map_err(|err| TrialError::ListingParse(err.to_string()))?;
    let rows = match file {
        ListingFile::Rows(entries) => entries
            .into_iter()
            .map(|entry| ListingRow {
                study_id: entry.study,
                disease_category: entry.disease_category,
                status: TrialStatus::from_listing_text(&entry.status),
            })
            .collect::<Vec<_>>(),
        ListingFile::Columns(columns) => rows_from_columns(&columns)?,
    };
    if rows.is_empty() {
        return Err(TrialError::EmptyListing);
    }
    Ok(rows)
}

fn rows_from_columns(
    columns: &BTreeMap<String, BTreeMap<String, Value>>,
) -> Result<Vec<ListingRow>, TrialError> {
    let study = indexed_column(columns, STUDY_COLUMN)?;
    let category = indexed_column(columns, CATEGORY_COLUMN)?;
    let status = indexed_column(columns, STATUS_COLUMN)?;

    let mut rows = Vec::with_capacity(study.len());
    for (index, study_id) in study {
        let disease_category = category.get(&index).ok_or_else(|| {
            TrialError::ListingParse(format!("row {index} has no {CATEGORY_COLUMN:?}"))
        })?;
        let status_text = status.get(&index).ok_or_else(|| {
            TrialError::ListingParse(format!("row {index} has no {STATUS_COLUMN:?}"))
        })?;
        rows.push(ListingRow {
            study_id,
            disease_category: disease_category.clone(),
            status: TrialStatus::from_listing_text(status_text),
        });
    }
    Ok(rows)
}

fn indexed_column(
    columns: &BTreeMap<String, BTreeMap<String, Value>>,
    name: &str,
) -> Result<BTreeMap<usize, String>, TrialError> {
    let column = columns
        .get(name)
        .ok_or_else(|| TrialError::ListingParse(format!("missing column {name:?}")))?;
    column
        .iter()
        .map(|(key, value)| {
            let index = key.parse::<usize>().map_err(|_| {
                TrialError::ListingParse(format!("column {name:?} has non-numeric index {key:?}"))
            })?;
            Ok((index, cell_text(value)))
        })
        .collect()
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
