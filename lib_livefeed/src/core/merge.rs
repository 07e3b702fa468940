use thiserror::Error;

/// A record that could not be folded into a tree. The engine logs it,
/// skips that record and carries on with the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// A timestamp field could not be parsed.
    #[error("invalid {field} timestamp: {value:?}")]
    InvalidTimestamp {
        /// Field name as sent by the server.
        field: &'static str,
        /// Raw value.
        value: String,
    },
}

/// # Merge Engine
///
/// A stateful fold over successive batches from one source. The engine owns
/// its tree exclusively; callers only ever read it through `tree()`.
///
/// `ingest` returns `true` iff something observable changed, so callers can
/// skip redundant downstream work.
pub trait MergeEngine: Send + 'static {
    /// Element type of a `Results` array.
    type Item: Send + 'static;
    /// The merged structure.
    type Tree;

    /// Folds one batch into the tree.
    fn ingest(&mut self, batch: Vec<Self::Item>) -> bool;

    /// Read access to the merged tree.
    fn tree(&self) -> &Self::Tree;
}

/// A merged tree that can be flattened into table rows for aggregation.
pub trait TabularView {
    /// One table row.
    type Row: Clone + Send + 'static;

    /// Rows in display order.
    fn rows(&self) -> Vec<Self::Row>;
}
