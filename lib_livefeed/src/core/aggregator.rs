//! # Per-Source Aggregation
//!
//! Fans one subscription out over many `Location`s and presents the result
//! as a single view. Every location keeps its own flow controller and merge
//! engine; nothing is merged across locations. The combined view lists
//! sources in the order they were given, and recomputes whenever any one of
//! them reports a change.
//!
//! A location whose connection gives up keeps its slot as a `NoData`
//! placeholder instead of disappearing, so row order stays stable. The
//! placeholder stays until the location is connected again, even when its
//! flow later replays a tree (e.g. on resume).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::flow_controller::{FlowController, SharedFlow};
use crate::core::merge::{MergeEngine, TabularView};
use crate::models::nodes::{NodeState, NodeStatus};
use crate::models::Location;

/// What one source currently contributes.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRows<R> {
    /// Nothing reported yet.
    Pending,
    /// Rows from the source's latest tree.
    Rows(Vec<R>),
    /// The source's connection gave up.
    NoData {
        /// Why.
        reason: String,
    },
}

impl<R> SourceRows<R> {
    /// `true` once the source reported data or failed.
    pub fn is_reported(&self) -> bool {
        !matches!(self, SourceRows::Pending)
    }
}

/// How many sources have reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateState {
    /// None yet.
    Empty,
    /// Some, not all.
    Partial,
    /// All sources reported at least once.
    Complete,
}

/// One line of the flattened view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaggedRow<'a, R> {
    /// A data row tagged with its source.
    Data {
        /// Source of the row.
        location: &'a Location,
        /// The row.
        row: &'a R,
    },
    /// Placeholder for a source without data.
    NoData {
        /// The failed source.
        location: &'a Location,
        /// Why it has no data.
        reason: &'a str,
    },
}

/// The combined view handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateView<R> {
    state: AggregateState,
    sources: Vec<(Location, SourceRows<R>)>,
}

impl<R> AggregateView<R> {
    /// All `locations` pending.
    pub fn pending(locations: &[Location]) -> Self {
        Self {
            state: AggregateState::Empty,
            sources: locations.iter().map(|l| (l.clone(), SourceRows::Pending)).collect(),
        }
    }

    /// Aggregate readiness.
    pub fn state(&self) -> AggregateState {
        self.state
    }

    /// Per-source contributions, in source order.
    pub fn sources(&self) -> &[(Location, SourceRows<R>)] {
        &self.sources
    }

    /// One source's contribution.
    pub fn source(&self, location: &Location) -> Option<&SourceRows<R>> {
        self.sources.iter().find(|(l, _)| l == location).map(|(_, rows)| rows)
    }

    /// Rows of every source in source order, each tagged with its location.
    /// Failed sources appear as a single placeholder; pending ones not at all.
    pub fn tagged_rows(&self) -> Vec<TaggedRow<'_, R>> {
        let mut out = Vec::new();
        for (location, rows) in &self.sources {
            match rows {
                SourceRows::Pending => {}
                SourceRows::Rows(rows) => out.extend(rows.iter().map(|row| TaggedRow::Data { location, row })),
                SourceRows::NoData { reason } => out.push(TaggedRow::NoData { location, reason }),
            }
        }
        out
    }

    /// Replaces one source's contribution and recomputes the state.
    pub fn update(&mut self, index: usize, rows: SourceRows<R>) {
        if let Some(slot) = self.sources.get_mut(index) {
            slot.1 = rows;
        }
        let reported = self.sources.iter().filter(|(_, rows)| rows.is_reported()).count();
        self.state = if reported == 0 {
            AggregateState::Empty
        } else if reported < self.sources.len() {
            AggregateState::Partial
        } else {
            AggregateState::Complete
        };
    }
}

/// Node counts for the cluster status tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterSummary {
    /// Nodes reporting online.
    pub online: usize,
    /// Nodes reporting offline, or without data.
    pub offline: usize,
    /// Nodes reporting disabled.
    pub disabled: usize,
}

impl ClusterSummary {
    /// Counts every reported source by its own node's status. A source
    /// that failed, or reported no status for itself, counts as offline.
    pub fn from_view(view: &AggregateView<NodeStatus>) -> Self {
        let mut summary = Self::default();
        for (location, rows) in view.sources() {
            let state = match rows {
                SourceRows::Pending => continue,
                SourceRows::NoData { .. } => NodeState::Offline,
                SourceRows::Rows(rows) => rows
                    .iter()
                    .find(|s| s.node_tag == location.node_tag)
                    .map(|s| s.state)
                    .unwrap_or(NodeState::Offline),
            };
            match state {
                NodeState::Online => summary.online += 1,
                NodeState::Offline => summary.offline += 1,
                NodeState::Disabled => summary.disabled += 1,
            }
        }
        summary
    }

    /// All counted nodes.
    pub fn total(&self) -> usize {
        self.online + self.offline + self.disabled
    }
}

type RowOf<E> = <<E as MergeEngine>::Tree as TabularView>::Row;
type ViewFn<R> = Box<dyn FnMut(&AggregateView<R>) + Send>;

struct ViewState<R> {
    view: AggregateView<R>,
    // Per source: reported `NoData` and not reconnected since.
    given_up: Vec<bool>,
    on_view: ViewFn<R>,
}

impl<R> ViewState<R> {
    fn report(&mut self, index: usize, rows: SourceRows<R>) {
        self.view.update(index, rows);
        (self.on_view)(&self.view);
    }

    fn report_rows(&mut self, index: usize, rows: Vec<R>) {
        if self.given_up.get(index).copied().unwrap_or(false) {
            return;
        }
        self.report(index, SourceRows::Rows(rows));
    }

    fn report_no_data(&mut self, index: usize, reason: String) {
        if let Some(flag) = self.given_up.get_mut(index) {
            *flag = true;
        }
        self.report(index, SourceRows::NoData { reason });
    }
}

/// One flow controller and merge engine per location, combined into one
/// `AggregateView`.
///
/// `on_view` runs while internal locks are held and must not call back
/// into the aggregator.
pub struct PerSourceAggregator<E>
where
    E: MergeEngine,
    E::Tree: TabularView,
{
    locations: Vec<Location>,
    view: Arc<Mutex<ViewState<RowOf<E>>>>,
    flows: Vec<SharedFlow<E>>,
    #[cfg(feature = "connections")]
    handles: Vec<crate::connections::ConnectionHandle>,
}

impl<E> PerSourceAggregator<E>
where
    E: MergeEngine,
    E::Tree: TabularView,
{
    /// Builds the per-location flows without opening anything. Data is fed
    /// through `flow()`.
    pub fn new(
        locations: Vec<Location>,
        mut make_engine: impl FnMut(&Location) -> E,
        on_view: impl FnMut(&AggregateView<RowOf<E>>) + Send + 'static,
    ) -> Self {
        let view = Arc::new(Mutex::new(ViewState {
            view: AggregateView::pending(&locations),
            given_up: vec![false; locations.len()],
            on_view: Box::new(on_view),
        }));

        let flows = locations
            .iter()
            .enumerate()
            .map(|(index, location)| {
                let sink = view.clone();
                FlowController::new(make_engine(location), move |tree: &E::Tree| {
                    sink.lock().report_rows(index, tree.rows())
                })
                .shared()
            })
            .collect();

        Self {
            locations,
            view,
            flows,
            #[cfg(feature = "connections")]
            handles: Vec::new(),
        }
    }

    /// Locations in source order.
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// The flow controller for `location`.
    pub fn flow(&self, location: &Location) -> Option<&SharedFlow<E>> {
        self.index_of(location).map(|i| &self.flows[i])
    }

    /// Replaces a location's rows with a placeholder that later merges of
    /// its flow do not overwrite.
    pub fn mark_no_data(&self, location: &Location, reason: impl Into<String>) {
        if let Some(index) = self.index_of(location) {
            self.view.lock().report_no_data(index, reason.into());
        }
    }

    /// Pauses every source.
    pub fn pause(&self) {
        for flow in &self.flows {
            flow.lock().pause();
        }
    }

    /// Resumes every source; each announces its replayed tree once.
    pub fn resume(&self) {
        for flow in &self.flows {
            flow.lock().resume();
        }
    }

    /// `true` when any source is paused.
    pub fn is_paused(&self) -> bool {
        self.flows.iter().any(|flow| flow.lock().is_paused())
    }

    /// A copy of the latest view.
    pub fn view(&self) -> AggregateView<RowOf<E>> {
        self.view.lock().view.clone()
    }

    fn index_of(&self, location: &Location) -> Option<usize> {
        self.locations.iter().position(|l| l == location)
    }
}

#[cfg(feature = "connections")]
mod live {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde::de::DeserializeOwned;
    use tracing::{info, warn};

    use super::{PerSourceAggregator, RowOf, ViewState};
    use crate::connections::{ConnectionError, StreamConnection, StreamHandler};
    use crate::core::flow_controller::SharedFlow;
    use crate::core::merge::{MergeEngine, TabularView};
    use crate::models::Location;

    struct SourceHandler<E>
    where
        E: MergeEngine,
        E::Tree: TabularView,
    {
        location: Location,
        index: usize,
        flow: SharedFlow<E>,
        view: Arc<Mutex<ViewState<RowOf<E>>>>,
    }

    impl<E> StreamHandler<E::Item> for SourceHandler<E>
    where
        E: MergeEngine,
        E::Tree: TabularView,
    {
        fn on_data(&mut self, batch: Vec<E::Item>) {
            self.flow.lock().push_batch(batch);
        }

        fn on_heartbeat(&mut self) {
            self.flow.lock().heartbeat();
        }

        fn on_terminal_error(&mut self, error: ConnectionError) {
            warn!(location = %self.location, error = %error, "source has no data");
            self.view.lock().report_no_data(self.index, error.to_string());
        }
    }

    impl<E> PerSourceAggregator<E>
    where
        E: MergeEngine,
        E::Item: DeserializeOwned,
        E::Tree: TabularView,
    {
        /// Builds the flows and opens one connection per location.
        pub fn open(
            connector: &StreamConnection,
            locations: Vec<Location>,
            make_engine: impl FnMut(&Location) -> E,
            on_view: impl FnMut(&super::AggregateView<RowOf<E>>) + Send + 'static,
        ) -> Self {
            let mut aggregator = Self::new(locations, make_engine, on_view);
            aggregator.connect(connector);
            aggregator
        }

        /// Opens one connection per location, replacing (and closing) any
        /// opened before. Pause first to hold live data back, e.g. while
        /// seeding from snapshots. `NoData` placeholders stay until their
        /// source merges again.
        pub fn connect(&mut self, connector: &StreamConnection) {
            self.view.lock().given_up.fill(false);
            let handles = self
                .locations
                .iter()
                .enumerate()
                .map(|(index, location)| {
                    let handler = SourceHandler {
                        location: location.clone(),
                        index,
                        flow: self.flows[index].clone(),
                        view: self.view.clone(),
                    };
                    connector.open(location.clone(), handler)
                })
                .collect();
            self.handles = handles;

            info!(sources = self.locations.len(), "aggregator connected");
        }

        /// Closes every connection. Idempotent.
        pub fn close(&self) {
            for handle in &self.handles {
                handle.close();
            }
        }

        /// Per-location connection handles, in source order.
        pub fn handles(&self) -> &[crate::connections::ConnectionHandle] {
            &self.handles
        }
    }
}
