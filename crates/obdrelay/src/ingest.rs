//! JSON-lines input for `obdrelay run`.
//!
//! One object per line:
//!
//! ```text
//! {"key": "ENGINE_RPM", "value": 1800}
//! {"catalog": "ENGINE_RPM;Engine speed;0;rpm\nVEHICLE_SPEED;Speed;0;km/h"}
//! {"flush": true}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Sample { key: String, value: String },
    /// `key;description;value;units` lines replacing the data-item catalog.
    Catalog(String),
    /// Flush without waiting for the debounce timer.
    Flush,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("line {line}: invalid JSON: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line}: {reason}")]
    Invalid { line: usize, reason: String },
}

#[derive(Debug, Deserialize)]
struct RawLine {
    key: Option<String>,
    value: Option<Value>,
    catalog: Option<String>,
    #[serde(default)]
    flush: bool,
}

/// Parse one input line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<Input>, IngestError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let raw: RawLine = serde_json::from_str(trimmed).map_err(|source| IngestError::Json {
        line: line_no,
        source,
    })?;

    if let Some(catalog) = raw.catalog {
        return Ok(Some(Input::Catalog(catalog)));
    }

    if let Some(key) = raw.key {
        let value = match raw.value {
            Some(Value::String(s)) => s,
            Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
            Some(Value::Null) | None => {
                return Err(IngestError::Invalid {
                    line: line_no,
                    reason: format!("sample '{key}' has no value"),
                });
            }
            Some(_) => {
                return Err(IngestError::Invalid {
                    line: line_no,
                    reason: format!("sample '{key}' value must be a string, number or bool"),
                });
            }
        };
        return Ok(Some(Input::Sample { key, value }));
    }

    if raw.flush {
        return Ok(Some(Input::Flush));
    }

    Err(IngestError::Invalid {
        line: line_no,
        reason: "expected \"key\"/\"value\", \"catalog\" or \"flush\"".into(),
    })
}
