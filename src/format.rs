//! Outgoing request construction for the collection endpoint.
//!
//! The endpoint accepts an HTTP GET with urlencoded query parameters: the
//! station credential under `hash` plus one parameter per mapped field.
//! Formatting is deterministic: identical inputs produce byte-identical URLs,
//! and a mapped field that is absent or null in the record is omitted from
//! the query entirely rather than sent as zero or empty.
//!
//! Every [`FormattedRequest`] carries a redacted twin of its URL with the
//! credential replaced by a placeholder; logging always goes through the
//! redacted form.

use std::fmt;

use reqwest::Url;

use crate::record::Record;

/// Placeholder substituted for the credential in loggable URLs.
const REDACTED_CREDENTIAL: &str = "XXX";

/// Query parameter name the credential is sent under.
const CREDENTIAL_PARAM: &str = "hash";

/// One row of the field mapping table.
#[derive(Debug, Clone)]
pub struct MappingEntry {
    /// Query parameter name at the destination
    pub dest: String,

    /// Field name in the transformed record
    pub source: String,

    /// Fixed-point decimal places used to render the value
    pub decimals: usize,

    /// Scale factor applied before rendering
    pub multiplier: f64,
}

impl MappingEntry {
    pub fn new(dest: &str, source: &str, decimals: usize, multiplier: f64) -> Self {
        Self {
            dest: dest.to_string(),
            source: source.to_string(),
            decimals,
            multiplier,
        }
    }

    fn render(&self, value: f64) -> String {
        format!("{:.*}", self.decimals, value * self.multiplier)
    }
}

/// Ordered field mapping table.
///
/// Destination names are unique; when a duplicate is supplied the first entry
/// wins. Iteration order fixes the serialization order of the produced query
/// string and nothing else.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    entries: Vec<MappingEntry>,
}

impl FieldMapping {
    pub fn new(entries: Vec<MappingEntry>) -> Self {
        let mut unique: Vec<MappingEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !unique.iter().any(|e| e.dest == entry.dest) {
                unique.push(entry);
            }
        }
        Self { entries: unique }
    }

    /// Mapping for the temperatur.nu report interface: outdoor temperature
    /// in degrees C, rendered without decimals, under `t`.
    pub fn temperatur_nu() -> Self {
        Self::new(vec![MappingEntry::new("t", "outTemp", 0, 1.0)])
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Errors from request formatting.
#[derive(Debug)]
pub enum FormatError {
    /// The configured server URL does not parse
    BadServerUrl(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BadServerUrl(e) => write!(f, "Invalid server URL: {}", e),
        }
    }
}

impl std::error::Error for FormatError {}

/// A fully-formed request for the collection endpoint.
///
/// `Display` renders the redacted form, so routing one of these through a log
/// line cannot leak the credential.
#[derive(Debug, Clone)]
pub struct FormattedRequest {
    url: Url,
    redacted: Url,
}

impl FormattedRequest {
    /// The real URL, credential included. Never log this.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The loggable URL with the credential replaced by a placeholder.
    pub fn redacted(&self) -> &Url {
        &self.redacted
    }
}

impl fmt::Display for FormattedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted)
    }
}

/// Build the outgoing request for one transformed record.
///
/// The credential is always included; a mapping entry contributes a parameter
/// only when its source field is present and non-null, rendered as
/// `value * multiplier` at the entry's precision.
pub fn format_request(
    record: &Record,
    mapping: &FieldMapping,
    credential: &str,
    server_url: &str,
) -> Result<FormattedRequest, FormatError> {
    let mut pairs: Vec<(&str, String)> = Vec::with_capacity(mapping.len() + 1);
    pairs.push((CREDENTIAL_PARAM, credential.to_string()));

    for entry in mapping.entries() {
        if let Some(value) = record.value(&entry.source) {
            pairs.push((entry.dest.as_str(), entry.render(value)));
        }
    }

    let url = Url::parse_with_params(server_url, &pairs)
        .map_err(|e| FormatError::BadServerUrl(e.to_string()))?;

    pairs[0].1 = REDACTED_CREDENTIAL.to_string();
    let redacted = Url::parse_with_params(server_url, &pairs)
        .map_err(|e| FormatError::BadServerUrl(e.to_string()))?;

    Ok(FormattedRequest { url, redacted })
}
