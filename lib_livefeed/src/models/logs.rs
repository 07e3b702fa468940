use serde::{Deserialize, Serialize};

/// One line from the admin log tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogEntry {
    /// Entry time, ISO 8601.
    pub time: String,
    /// Severity, e.g. `Info`, `Warn`, `Error`.
    #[serde(default)]
    pub level: String,
    /// Component that produced the entry.
    #[serde(default)]
    pub source: String,
    /// Logger name.
    #[serde(default)]
    pub logger: String,
    /// Message text.
    #[serde(default)]
    pub message: String,
    /// Exception text, if any.
    #[serde(default)]
    pub exception: Option<String>,
}
