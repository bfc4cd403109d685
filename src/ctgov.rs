use std::time::Instant;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::config::LookupSettings;
use crate::domain::{DetailRecord, ResolutionOutcome};
use crate::error::TrialError;
use crate::normalize::NormalizedId;

const MALFORMED: &str = "malformed payload";
const MAX_STATUS_MESSAGE: usize = 200;

/// One lookup attempt against the trial-detail service.
pub trait CtgovClient: Send + Sync {
    fn fetch_study(&self, id: &NormalizedId) -> ResolutionOutcome;
}

#[derive(Clone)]
pub struct CtgovHttpClient {
    client: Client,
    base_url: String,
}

impl CtgovHttpClient {
    pub fn new(settings: &LookupSettings) -> Result<Self, TrialError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("trial-digest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TrialError::CtgovHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| TrialError::CtgovHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
        })
    }

    pub fn study_url(&self, id: &NormalizedId) -> String {
        study_query_url(&self.base_url, id)
    }
}

impl CtgovClient for CtgovHttpClient {
    fn fetch_study(&self, id: &NormalizedId) -> ResolutionOutcome {
        let url = self.study_url(id);
        let start = Instant::now();
        let response = match self.client.get(&url).send() {
            Ok(response) => response,
            Err(err) => {
                return ResolutionOutcome::TransientError(
                    TrialError::CtgovHttp(err.to_string()).to_string(),
                );
            }
        };
        let status = response.status();
        debug!(
            %id,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "ctgov.response"
        );

        if !status.is_success() {
            let mut message = response
                .text()
                .unwrap_or_else(|_| "ClinicalTrials.gov request failed".to_string());
            truncate_chars(&mut message, MAX_STATUS_MESSAGE);
            return ResolutionOutcome::TransientError(
                TrialError::CtgovStatus {
                    status: status.as_u16(),
                    message,
                }
                .to_string(),
            );
        }

        match response.json::<Value>() {
            Ok(payload) => classify_payload(&payload),
            Err(err) => ResolutionOutcome::TransientError(format!("{MALFORMED}: {err}")),
        }
    }
}

pub fn study_query_url(base_url: &str, id: &NormalizedId) -> String {
    format!(
        "{}?expr={}&min_rnk=1&max_rnk=1&fmt=json",
        base_url.trim_end_matches('/'),
        id.query_value()
    )
}

/// Turns a full-studies response into an outcome. Zero matches is `NotFound`; a match missing
/// any required field is a transient failure rather than a partially filled record.
pub fn classify_payload(payload: &Value) -> ResolutionOutcome {
    let Some(response) = payload.get("FullStudiesResponse") else {
        return malformed("FullStudiesResponse");
    };
    let Some(found) = response.get("NStudiesFound").and_then(|value| value.as_u64()) else {
        return malformed("NStudiesFound");
    };
    if found == 0 {
        return ResolutionOutcome::NotFound;
    }

    let Some(protocol) = response
        .get("FullStudies")
        .and_then(|value| value.as_array())
        .and_then(|studies| studies.first())
        .and_then(|study| study.get("Study"))
        .and_then(|study| study.get("ProtocolSection"))
    else {
        return malformed("FullStudies[0].Study.ProtocolSection");
    };

    let identification = protocol.get("IdentificationModule");
    let Some(nct_id) = text_field(identification, "NCTId") else {
        return malformed("NCTId");
    };
    let Some(official_title) = text_field(identification, "OfficialTitle") else {
        return malformed("OfficialTitle");
    };
    let Some(brief_summary) = text_field(protocol.get("DescriptionModule"), "BriefSummary") else {
        return malformed("BriefSummary");
    };
    let Some(eligibility_criteria) =
        text_field(protocol.get("EligibilityModule"), "EligibilityCriteria")
    else {
        return malformed("EligibilityCriteria");
    };
    let Some(phase) = phase_list(protocol) else {
        return malformed("PhaseList");
    };

    ResolutionOutcome::Found(DetailRecord {
        nct_id,
        official_title,
        brief_summary,
        eligibility_criteria,
        phase,
    })
}

fn text_field(section: Option<&Value>, key: &str) -> Option<String> {
    section
        .and_then(|value| value.get(key))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
}

fn phase_list(protocol: &Value) -> Option<Vec<String>> {
    let phase = protocol
        .get("DesignModule")
        .and_then(|value| value.get("PhaseList"))
        .and_then(|value| value.get("Phase"))?;
    match phase {
        Value::String(single) => Some(vec![single.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(|value| value.to_string()))
            .collect(),
        _ => None,
    }
}

fn malformed(field: &str) -> ResolutionOutcome {
    ResolutionOutcome::TransientError(format!("{MALFORMED}: missing {field}"))
}

fn truncate_chars(value: &mut String, max: usize) {
    if let Some((idx, _)) = value.char_indices().nth(max) {
        value.truncate(idx);
    }
}
