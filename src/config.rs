use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::TrialError;
use crate::normalize::AliasTable;
use crate::resolver::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "trial-digest.json";
pub const DEFAULT_LOOKUP_URL: &str = "https://clinicaltrials.gov/api/query/full_studies";
pub const MAX_CONCURRENCY: usize = 16;
pub const MAX_RETRIES: u32 = 10;
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub aliases: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub lookup: Option<LookupSection>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LookupSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LookupSettings {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LOOKUP_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub aliases: AliasTable,
    pub lookup: LookupSettings,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub output_dir: Utf8PathBuf,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            aliases: default_aliases(),
            lookup: LookupSettings::default(),
            concurrency: 4,
            retry: RetryPolicy::default(),
            output_dir: Utf8PathBuf::from("."),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `trial-digest.json` from the working directory when present.
    /// Without either, the built-in defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TrialError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(TrialError::MissingConfig(config_path));
            }
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TrialError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| TrialError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TrialError> {
        let defaults = ResolvedConfig::default();
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(TrialError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let aliases = match config.aliases {
            Some(map) => AliasTable::from_pairs(map)?,
            None => defaults.aliases,
        };

        let lookup = config.lookup.unwrap_or_default();
        let base_url = lookup
            .base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or(defaults.lookup.base_url);
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TrialError::InvalidConfig(format!(
                "lookup.base_url must be an http(s) URL: {base_url}"
            )));
        }
        let timeout = match lookup.timeout_secs {
            Some(0) => {
                return Err(TrialError::InvalidConfig(
                    "lookup.timeout_secs must be positive".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.lookup.timeout,
        };

        let concurrency = config.concurrency.unwrap_or(defaults.concurrency);
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(TrialError::InvalidConfig(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {concurrency}"
            )));
        }

        let retry = config.retry.unwrap_or_default();
        let max_retries = retry.max_retries.unwrap_or(defaults.retry.max_retries);
        if max_retries > MAX_RETRIES {
            return Err(TrialError::InvalidConfig(format!(
                "retry.max_retries must be at most {MAX_RETRIES}, got {max_retries}"
            )));
        }
        let delay = match retry.delay_ms {
            Some(ms) if ms > MAX_RETRY_DELAY_MS => {
                return Err(TrialError::InvalidConfig(format!(
                    "retry.delay_ms must be at most {MAX_RETRY_DELAY_MS}, got {ms}"
                )));
            }
            Some(ms) => Duration::from_millis(ms),
            None => defaults.retry.delay,
        };
        let retry = RetryPolicy { max_retries, delay };

        let output_dir = config
            .output_dir
            .map(Utf8PathBuf::from)
            .unwrap_or(defaults.output_dir);

        Ok(ResolvedConfig {
            schema_version,
            aliases,
            lookup: LookupSettings { base_url, timeout },
            concurrency,
            retry,
            output_dir,
        })
    }
}

/// Co-registered studies known to be listed under a joint code.
pub fn default_aliases() -> AliasTable {
    let mut entries = BTreeMap::new();
    entries.insert("NRG-GI004/SWOG-S1610".to_string(), "S1610".to_string());
    entries.insert("SWOG-S1207 NSABP B-53".to_string(), "S1207".to_string());
    AliasTable::from_pairs(entries).unwrap_or_default()
}
