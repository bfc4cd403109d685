//! Canonical trial identifiers.
//!
//! Listing identifiers arrive with bracket markers, stray whitespace and, for co-registered
//! studies, two codes joined together. Normalization applies a fixed sequence of rules:
//!
//! 1. trim surrounding bracket characters and whitespace,
//! 2. collapse internal whitespace runs to a single space,
//! 3. replace known composite identifiers through the alias table.
//!
//! Query escaping is kept out of the canonical form (see [`NormalizedId::query_value`]) so that
//! `normalize(normalize(x)) == normalize(x)` holds for every input.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::TrialError;

const BRACKETS: [char; 6] = ['[', ']', '(', ')', '{', '}'];

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static COMPOSITE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9](\s*[/+&]\s*|\s+)[A-Za-z0-9]").unwrap());

/// Lookup-safe identifier. An empty inner value is the invalid sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NormalizedId(String);

impl NormalizedId {
    pub fn invalid() -> Self {
        Self(String::new())
    }

    pub fn is_invalid(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier percent-escaped for direct inclusion in a query string.
    pub fn query_value(&self) -> String {
        encode_query_component(&self.0)
    }

    /// True when the identifier still looks like two codes joined together.
    pub fn is_composite(&self) -> bool {
        COMPOSITE_SEPARATOR.is_match(&self.0)
    }
}

impl fmt::Display for NormalizedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            return write!(f, "<invalid>");
        }
        write!(f, "{}", self.0)
    }
}

/// Composite identifier → representative identifier. Keys and targets are stored in canonical
/// form and no target is itself a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    entries: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, TrialError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut entries = BTreeMap::new();
        for (from, to) in pairs {
            let key = canonical_form(from.as_ref());
            let target = canonical_form(to.as_ref());
            if key.is_empty() || target.is_empty() {
                return Err(TrialError::InvalidAlias {
                    from: from.as_ref().to_string(),
                    to: to.as_ref().to_string(),
                    reason: "alias and target must not be empty".to_string(),
                });
            }
            if key == target {
                continue;
            }
            if let Some(existing) = entries.get(&key) {
                if existing != &target {
                    return Err(TrialError::InvalidAlias {
                        from: from.as_ref().to_string(),
                        to: to.as_ref().to_string(),
                        reason: format!("already mapped to {existing:?}"),
                    });
                }
            }
            entries.insert(key, target);
        }

        for (from, to) in &entries {
            if entries.contains_key(to) {
                return Err(TrialError::InvalidAlias {
                    from: from.clone(),
                    to: to.clone(),
                    reason: "target is itself an alias".to_string(),
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn get(&self, canonical: &str) -> Option<&str> {
        self.entries.get(canonical).map(|value| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    aliases: AliasTable,
}

impl Normalizer {
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn normalize(&self, raw: &str) -> NormalizedId {
        let canonical = canonical_form(raw);
        if canonical.is_empty() {
            return NormalizedId::invalid();
        }
        match self.aliases.get(&canonical) {
            Some(target) => NormalizedId(target.to_string()),
            None => NormalizedId(canonical),
        }
    }
}

fn canonical_form(raw: &str) -> String {
    let trimmed = trim_brackets(raw);
    collapse_whitespace(trimmed)
}

fn trim_brackets(value: &str) -> &str {
    value.trim_matches(|ch: char| ch.is_whitespace() || BRACKETS.contains(&ch))
}

fn collapse_whitespace(value: &str) -> String {
    WHITESPACE_RUN.replace_all(value, " ").into_owned()
}

fn encode_query_component(value: &str) -> String {
    let mut out = String::new();
    for byte in value.as_bytes() {
        let ch = *byte as char;
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' || ch == '~' {
            out.push(ch);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
