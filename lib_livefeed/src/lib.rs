//! # lib_livefeed
//!
//! Client-side live telemetry. A subscription is opened per data source
//! (a node, optionally a shard), incremental result batches are folded into
//! a stable in-memory tree, and consumers see the merged tree at a pace
//! they control through pause/resume.
//!
//! ```text
//! server ──► StreamConnection (per Location) ──► FlowController ──► MergeEngine
//!                                                                      │
//!                                      consumer ◄── PerSourceAggregator ◄┘
//! ```
//!
//! Modules are gated by cargo features, one per folder:
//! `core`, `connections`, `configs`, `loggers`, `retrieve`. `models` is
//! always available. The default feature set is `full`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Locations, wire payloads and the record types carried by live feeds.
pub mod models;

/// Merge engines, flow control and per-source aggregation.
#[cfg(feature = "core")]
pub mod core;

/// Reconnecting stream connections and their transports.
#[cfg(feature = "connections")]
pub mod connections;

/// Feed configuration files.
#[cfg(feature = "configs")]
pub mod configs;

/// tracing bootstrap for binaries.
#[cfg(feature = "loggers")]
pub mod loggers;

/// One-shot snapshot retrieval used to seed merge engines.
#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use models::{Location, RawPayload};
