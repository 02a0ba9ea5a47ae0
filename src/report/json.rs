//! JSON encoding of verdicts.

use super::QualityVerdict;
use crate::error::Result;

/// JSON output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonFormat {
    /// Pretty-printed JSON with indentation
    #[default]
    Pretty,
    /// Compact JSON without extra whitespace
    Compact,
}

/// Convert a verdict to JSON.
pub fn to_json(verdict: &QualityVerdict, format: JsonFormat) -> Result<String> {
    let json = match format {
        JsonFormat::Pretty => serde_json::to_string_pretty(verdict)?,
        JsonFormat::Compact => serde_json::to_string(verdict)?,
    };
    Ok(json)
}

/// Parse a verdict from JSON.
pub fn from_json(json: &str) -> Result<QualityVerdict> {
    Ok(serde_json::from_str(json)?)
}
