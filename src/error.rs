//! Crate-level error types for table synchronization.
//!
//! The taxonomy mirrors how failures propagate through the engine:
//! configuration errors are raised at construction or dispatch time,
//! validation and fetch errors abort the enclosing event-handling task,
//! and storage errors surface unchanged from the [`Storage`](crate::Storage)
//! backend. [`SyncError`] aggregates all of them for the event bus.

use crate::id::TableId;

/// Misconfiguration detected while building tables or dispatching events.
///
/// Never retried: the same input always produces the same error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No table kind is registered for the requested group.
    #[error("unknown table group: {0}")]
    UnknownGroup(String),

    /// A table was constructed with an id whose group does not match its kind.
    #[error("table id {id} does not belong to group '{expected}'")]
    GroupMismatch {
        /// The offending id.
        id: TableId,
        /// The group declared by the table kind.
        expected: String,
    },

    /// A table id points at a namespace other than the registry's.
    #[error("table id {id} is outside namespace '{expected}'")]
    NamespaceMismatch {
        /// The offending id.
        id: TableId,
        /// The namespace the registry serves.
        expected: String,
    },

    /// The same group was registered twice.
    #[error("table group '{0}' registered more than once")]
    DuplicateGroup(String),

    /// No handler is registered for the event kind.
    #[error("no handler registered for event '{0}'")]
    UnregisteredEvent(&'static str),

    /// A table kind received an event it does not handle.
    #[error("table group '{group}' cannot handle event '{event}'")]
    UnexpectedEvent {
        /// Group of the table.
        group: String,
        /// Kind of the event.
        event: &'static str,
    },

    /// The engine builder lacks a required part.
    #[error("engine is missing {0}")]
    Incomplete(&'static str),

    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A new payload violates the table's index discipline.
///
/// The table keeps its last committed payload when this is raised.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Row index is not sorted in increasing order.
    #[error("{id}: index is not increasing at position {position}")]
    NotIncreasing {
        /// Table being validated.
        id: TableId,
        /// First row whose key is smaller than its predecessor.
        position: usize,
    },

    /// Row index contains the same key twice.
    #[error("{id}: duplicate index key {key}")]
    DuplicateIndex {
        /// Table being validated.
        id: TableId,
        /// The repeated key.
        key: String,
    },

    /// A previously committed value changed in the new payload.
    #[error("{id}: new data does not match history at index {key}, column '{column}'")]
    HistoryMismatch {
        /// Table being validated.
        id: TableId,
        /// Index key of the mismatching row.
        key: String,
        /// Column of the mismatching cell.
        column: String,
    },

    /// The payload layout differs from what the table kind expects.
    #[error("{id}: unexpected layout: {reason}")]
    Layout {
        /// Table being validated.
        id: TableId,
        /// Human-readable description of the problem.
        reason: String,
    },
}

/// Failure reported by an external [`Gateway`](crate::Gateway).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport-level failure (connection reset, timeout, bad status).
    #[error("transport error while fetching {source_name}: {message}")]
    Transport {
        /// Name of the upstream source.
        source_name: String,
        /// Error reported by the transport.
        message: String,
    },

    /// The upstream answered but the response could not be interpreted.
    #[error("malformed response from {source_name}: {message}")]
    Malformed {
        /// Name of the upstream source.
        source_name: String,
        /// What was wrong with the response.
        message: String,
    },

    /// The fetched rows could not be assembled into a frame.
    #[error("fetched rows are not a valid frame: {0}")]
    Frame(#[from] FrameError),
}

/// A frame could not be built because its parts disagree in shape.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Index length differs from the number of rows.
    #[error("index has {index} entries but there are {rows} rows")]
    IndexLength {
        /// Length of the index.
        index: usize,
        /// Number of rows.
        rows: usize,
    },

    /// A row has a different width than the column list.
    #[error("row {row} has {width} cells but there are {columns} columns")]
    RowWidth {
        /// Offending row position.
        row: usize,
        /// Width of that row.
        width: usize,
        /// Number of columns.
        columns: usize,
    },

    /// Two frames with different columns were concatenated.
    #[error("cannot concatenate frames with different columns")]
    ColumnMismatch,
}

/// Failure reported by a [`Storage`](crate::Storage) backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be serialized or parsed.
    #[error("document serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A stored document could not be mapped to or from table fields.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A field encoder or decoder rejected its value.
    #[error("{id}: field '{field}' could not be converted: {source}")]
    Field {
        /// Table whose document was being converted.
        id: TableId,
        /// Field being converted.
        field: &'static str,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

/// Top-level error for the event bus, units of work and queries.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Misconfiguration; see [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// New data was rejected; see [`ValidationError`].
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An external fetch failed; see [`FetchError`].
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A storage call failed; see [`StorageError`].
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A document could not be mapped; see [`CodecError`].
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A frame was assembled from mismatched parts.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// An operation needed data from a table that was never loaded.
    #[error("table {0} has never been updated")]
    NeverUpdated(TableId),

    /// A table did not contain a row the operation needed.
    #[error("table {id} has no row for '{key}'")]
    MissingRow {
        /// Table that was searched.
        id: TableId,
        /// Index key that was requested.
        key: String,
    },

    /// The cascade produced more events than the configured bound.
    #[error("cascade exceeded {limit} events")]
    CascadeLimit {
        /// The configured bound.
        limit: usize,
    },

    /// An event-handling task panicked.
    #[error("event handling task panicked: {0}")]
    TaskPanicked(String),

    /// The blocking facade was called inside a runtime or could not build
    /// its own.
    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),
}
