//! Document engine abstraction.
//!
//! The heavyweight conversion engine is opaque behind [`DocumentEngine`]:
//! list filters, convert, compare. The production implementation drives
//! the supervised engine process over its control socket
//! ([`remote::RemoteEngine`]); tests substitute stubs.

pub mod handle;
pub mod remote;
pub mod supervisor;

pub use handle::{EngineHandle, EngineState};
pub use remote::RemoteEngine;
pub use supervisor::{EngineSupervisor, LaunchSpec};

use crate::error::{Result, ScribaError};
use crate::filters::FilterDescriptor;
use crate::transport::WireDocument;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A typed `name=value` option forwarded to a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOption {
    pub name: String,
    pub value: FilterOptionValue,
}

/// Filter option values keep their natural type on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterOptionValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl std::str::FromStr for FilterOption {
    type Err = ScribaError;

    /// Parse `name=value`, typing the value as bool or number when it
    /// reads as one.
    fn from_str(s: &str) -> Result<Self> {
        let (name, raw) = s.split_once('=').ok_or_else(|| ScribaError::InvalidRequest {
            message: format!("Invalid filter option '{}' (expected name=value)", s),
        })?;
        if name.is_empty() {
            return Err(ScribaError::InvalidRequest {
                message: format!("Invalid filter option '{}' (empty name)", s),
            });
        }

        let value = if raw.eq_ignore_ascii_case("true") {
            FilterOptionValue::Bool(true)
        } else if raw.eq_ignore_ascii_case("false") {
            FilterOptionValue::Bool(false)
        } else if let Ok(n) = raw.parse::<f64>() {
            FilterOptionValue::Number(n)
        } else {
            FilterOptionValue::Text(raw.to_string())
        };

        Ok(FilterOption {
            name: name.to_string(),
            value,
        })
    }
}

/// A fully resolved conversion, ready for the engine.
///
/// Filter identifiers are canonical by the time a job is built; raw user
/// input never reaches the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub input: WireDocument,
    /// Where the engine writes the result; `None` means return the bytes.
    pub output_path: Option<PathBuf>,
    /// Canonical import filter identifier, if the caller forced one.
    pub input_filter: Option<String>,
    /// Canonical export filter identifier.
    pub output_filter: String,
    #[serde(default)]
    pub filter_options: Vec<FilterOption>,
    /// Refresh document indexes (table of contents etc.) before export.
    pub update_index: bool,
}

/// A fully resolved document comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonJob {
    pub old: WireDocument,
    pub new: WireDocument,
    pub output_path: Option<PathBuf>,
    /// Canonical export filter identifier for the comparison result.
    pub output_filter: String,
}

/// The narrow interface the service holds against the engine.
#[async_trait::async_trait]
pub trait DocumentEngine: Send + Sync + 'static {
    /// Filters the engine can load documents with.
    async fn import_filters(&self) -> Result<Vec<FilterDescriptor>>;

    /// Filters the engine can write documents with.
    async fn export_filters(&self) -> Result<Vec<FilterDescriptor>>;

    /// Load the input, optionally refresh indexes, export with the output
    /// filter. Returns the produced bytes when the job has no output path.
    async fn convert(&self, job: &ConversionJob) -> Result<Option<Vec<u8>>>;

    /// Produce a tracked-changes comparison of two documents.
    async fn compare(&self, job: &ComparisonJob) -> Result<Option<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_option_parse_text() {
        let opt: FilterOption = "PageRange=1-5".parse().unwrap();
        assert_eq!(opt.name, "PageRange");
        assert_eq!(opt.value, FilterOptionValue::Text("1-5".into()));
    }

    #[test]
    fn test_filter_option_parse_bool_and_number() {
        let opt: FilterOption = "UseLosslessCompression=true".parse().unwrap();
        assert_eq!(opt.value, FilterOptionValue::Bool(true));

        let opt: FilterOption = "Quality=90".parse().unwrap();
        assert_eq!(opt.value, FilterOptionValue::Number(90.0));
    }

    #[test]
    fn test_filter_option_value_survives_equals_sign() {
        // Only the first '=' splits; the rest belongs to the value
        let opt: FilterOption = "Watermark=draft=v2".parse().unwrap();
        assert_eq!(opt.name, "Watermark");
        assert_eq!(opt.value, FilterOptionValue::Text("draft=v2".into()));
    }

    #[test]
    fn test_filter_option_rejects_missing_equals() {
        assert!("NoSeparator".parse::<FilterOption>().is_err());
        assert!("=value".parse::<FilterOption>().is_err());
    }

    #[test]
    fn test_filter_option_json_keeps_value_types() {
        let opts = vec![
            FilterOption {
                name: "a".into(),
                value: FilterOptionValue::Bool(false),
            },
            FilterOption {
                name: "b".into(),
                value: FilterOptionValue::Number(2.5),
            },
        ];
        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("false"));
        assert!(json.contains("2.5"));

        let back: Vec<FilterOption> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }
}
