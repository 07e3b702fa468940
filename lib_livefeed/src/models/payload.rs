//! # Raw Payloads
//!
//! Every text frame from a live endpoint is either a results envelope,
//! `{ "Results": [ ... ] }`, or a content-free ping used only to prove the
//! subscription is alive. Anything else is a decode error; the caller drops
//! the frame and keeps the connection open.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while classifying an inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON or `Results` has the wrong shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is a non-empty JSON object without a `Results` array.
    #[error("payload has no Results array")]
    MissingResults,
}

/// A decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload<T> {
    /// A batch of application records, possibly empty.
    Results(Vec<T>),
    /// A liveness ping with no application data.
    Heartbeat,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope<T> {
    results: Vec<T>,
}

impl<T: DeserializeOwned> RawPayload<T> {
    /// Classifies and decodes one text frame.
    ///
    /// Blank frames, `null` and `{}` are heartbeats.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(RawPayload::Heartbeat);
        }

        let value: Value = serde_json::from_str(trimmed)?;
        let has_results = match &value {
            Value::Null => return Ok(RawPayload::Heartbeat),
            Value::Object(map) if map.is_empty() => return Ok(RawPayload::Heartbeat),
            Value::Object(map) => map.contains_key("Results"),
            _ => false,
        };
        if !has_results {
            return Err(DecodeError::MissingResults);
        }

        let envelope: Envelope<T> = serde_json::from_value(value)?;
        Ok(RawPayload::Results(envelope.results))
    }

    /// True for liveness pings.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, RawPayload::Heartbeat)
    }
}
