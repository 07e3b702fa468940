//! # Flow Controller
//!
//! Sits between a connection and a merge engine. While flowing, each batch
//! is merged at once and `on_merged` fires when the engine reports a change.
//! While paused, batches queue up untouched; `resume` replays them in
//! arrival order and fires `on_merged` exactly once, however many batches
//! were queued.
//!
//! Heartbeats bypass the queue entirely.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::merge::MergeEngine;
use crate::models::RawPayload;

type MergedFn<T> = Box<dyn FnMut(&T) + Send>;
type HeartbeatFn = Box<dyn FnMut() + Send>;

/// Pause/resume gate in front of one merge engine.
pub struct FlowController<E: MergeEngine> {
    engine: E,
    paused: bool,
    buffer: VecDeque<Vec<E::Item>>,
    on_merged: MergedFn<E::Tree>,
    on_heartbeat: Option<HeartbeatFn>,
}

/// A flow controller shared between its connection and the consumer.
pub type SharedFlow<E> = Arc<Mutex<FlowController<E>>>;

impl<E: MergeEngine> FlowController<E> {
    /// Wraps `engine`. Starts flowing.
    ///
    /// `on_merged` runs while the controller is borrowed; it must not call
    /// back into the same controller.
    pub fn new(engine: E, on_merged: impl FnMut(&E::Tree) + Send + 'static) -> Self {
        Self {
            engine,
            paused: false,
            buffer: VecDeque::new(),
            on_merged: Box::new(on_merged),
            on_heartbeat: None,
        }
    }

    /// Adds a heartbeat passthrough.
    pub fn with_heartbeat(mut self, on_heartbeat: impl FnMut() + Send + 'static) -> Self {
        self.on_heartbeat = Some(Box::new(on_heartbeat));
        self
    }

    /// Wraps the controller for sharing with a connection.
    pub fn shared(self) -> SharedFlow<E> {
        Arc::new(Mutex::new(self))
    }

    /// Routes a decoded payload: results are merged or queued, heartbeats
    /// pass straight through.
    pub fn push(&mut self, payload: RawPayload<E::Item>) {
        match payload {
            RawPayload::Results(batch) => self.push_batch(batch),
            RawPayload::Heartbeat => self.heartbeat(),
        }
    }

    /// Merges `batch` now, or queues it while paused.
    pub fn push_batch(&mut self, batch: Vec<E::Item>) {
        if self.paused {
            self.buffer.push_back(batch);
            return;
        }
        if self.engine.ingest(batch) {
            (self.on_merged)(self.engine.tree());
        }
    }

    /// Merges an initial snapshot, ahead of anything already queued.
    ///
    /// Announced like a live batch when flowing. While paused the snapshot
    /// goes to the front of the queue, so resume still replays it first.
    pub fn seed(&mut self, snapshot: Vec<E::Item>) {
        debug!(items = snapshot.len(), paused = self.paused, "seeding merge engine");
        if self.paused {
            self.buffer.push_front(snapshot);
        } else {
            self.push_batch(snapshot);
        }
    }

    /// Forwards a heartbeat. Never queued.
    pub fn heartbeat(&mut self) {
        if let Some(f) = self.on_heartbeat.as_mut() {
            f();
        }
    }

    /// Starts queueing. Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!("flow paused");
        }
    }

    /// Replays the queue in order, then notifies once. No-op when flowing.
    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;

        let queued = self.buffer.len();
        while let Some(batch) = self.buffer.pop_front() {
            self.engine.ingest(batch);
        }
        debug!(queued, "flow resumed");
        (self.on_merged)(self.engine.tree());
    }

    /// `true` while queueing.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Number of queued batches.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The engine's current tree.
    pub fn tree(&self) -> &E::Tree {
        self.engine.tree()
    }
}

#[cfg(feature = "connections")]
mod stream {
    use tracing::warn;

    use super::SharedFlow;
    use crate::connections::{ConnectionError, StreamHandler};
    use crate::core::merge::MergeEngine;

    impl<E: MergeEngine> StreamHandler<E::Item> for SharedFlow<E> {
        fn on_data(&mut self, batch: Vec<E::Item>) {
            self.lock().push_batch(batch);
        }

        fn on_heartbeat(&mut self) {
            self.lock().heartbeat();
        }

        fn on_terminal_error(&mut self, error: ConnectionError) {
            warn!(error = %error, "flow source gave up");
        }
    }
}
