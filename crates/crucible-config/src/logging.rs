//! Logging output configuration.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Supported diagnostic log formats.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => formatter.write_str("json"),
            Self::Compact => formatter.write_str("compact"),
        }
    }
}

/// Error produced when parsing a [`LogFormat`] from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFormatParseError(String);

impl fmt::Display for LogFormatParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "unknown log format: {}", self.0)
    }
}

impl std::error::Error for LogFormatParseError {}

impl FromStr for LogFormat {
    type Err = LogFormatParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(LogFormatParseError(other.to_owned())),
        }
    }
}
