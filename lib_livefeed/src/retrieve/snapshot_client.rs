//! # Snapshot Client
//!
//! Fetches the current state of a feed over plain HTTP, so a merge engine
//! can be seeded before its live subscription starts. The REST endpoints
//! answer with the same `{ "Results": [...] }` envelope the live feeds use.
//!
//! Transient failures (connect errors, 5xx, 429) are retried with
//! exponential backoff by `reqwest-retry`.

use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{DecodeError, Location, RawPayload};

/// Snapshot retrieval failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Reading the response failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request failed after retries.
    #[error("request failed: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The body is not a results envelope.
    #[error("undecodable snapshot: {0}")]
    Decode(#[from] DecodeError),

    /// The endpoint URL could not be built.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// HTTP client for feed snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    database: Option<String>,
}

impl SnapshotClient {
    /// Creates a client against `server_url` retrying transient errors up
    /// to `max_retries` times.
    pub fn new(server_url: &str, max_retries: u32) -> Result<Self, SnapshotError> {
        let base_url = Url::parse(server_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SnapshotError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let inner = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            base_url,
            database: None,
        })
    }

    /// Scopes requests to a database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// `{base}/databases/{db}/{endpoint}?nodeTag=..&shardNumber=..`.
    pub fn endpoint_url(&self, endpoint: &str, location: &Location) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            if let Some(database) = &self.database {
                segments.push("databases").push(database);
            }
            segments.extend(endpoint.trim_matches('/').split('/'));
        }
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in location.query_pairs() {
                query.append_pair(key, &value);
            }
        }
        url
    }

    /// GETs the snapshot of `endpoint` for `location`.
    ///
    /// An empty or heartbeat-shaped body yields an empty snapshot.
    pub async fn fetch<T: DeserializeOwned>(&self, endpoint: &str, location: &Location) -> Result<Vec<T>, SnapshotError> {
        let url = self.endpoint_url(endpoint, location);
        debug!(%url, %location, "fetching snapshot");

        let response = self.inner.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%url, status = status.as_u16(), "snapshot request rejected");
            return Err(SnapshotError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        match RawPayload::<T>::decode(&text)? {
            RawPayload::Results(items) => {
                debug!(%location, items = items.len(), "snapshot received");
                Ok(items)
            }
            RawPayload::Heartbeat => Ok(Vec::new()),
        }
    }
}
