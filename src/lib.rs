//! Event-driven synchronization of versioned market-data tables.
//!
//! Tables are named datasets kept consistent with slowly changing external
//! sources. A seed event such as [`Event::AppStarted`] starts a cascade on
//! the [`EventBus`]: each event is handled in its own [`UnitOfWork`], the
//! tables it touches decide whether to refetch, validate the new data and
//! derive follow-up events, and every changed table is committed to
//! [`Storage`] before its follow-ups run.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tablesync::{Event, FetchError, FetchRequest, FnGateway, Frame, Gateways, SyncEngine};
//!
//! let gateway = FnGateway::new(|request: FetchRequest| async move {
//!     // Download `request.table` from somewhere.
//!     Ok::<_, FetchError>(Frame::empty(["CLOSE"]))
//! });
//! let engine = SyncEngine::builder()
//!     .storage_dir("/var/lib/tablesync")
//!     .gateways(Gateways::uniform(Arc::new(gateway)))
//!     .build()?;
//! let report = engine.submit(Event::AppStarted { at: chrono::Utc::now() })?;
//! println!("{} tasks", report.tasks);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bus;
mod config;
mod entity;
mod error;
mod event;
mod frame;
mod gateway;
mod handlers;
mod id;
mod mapper;
mod query;
mod registry;
mod repository;
mod storage;
mod table;
pub mod tables;
mod uow;

pub use bus::{BusReport, EventBus};
pub use config::{DEFAULT_NAMESPACE, SyncConfig, SyncEngine, SyncEngineBuilder};
pub use entity::{ChangeTracker, ChangedState, Entity};
pub use error::{
    CodecError, ConfigError, FetchError, FrameError, StorageError, SyncError, ValidationError,
};
pub use event::{Event, EventKind};
pub use frame::{Frame, IndexKey, check_history, merge_incremental};
pub use gateway::{FetchRequest, FnGateway, Gateway, Gateways};
pub use handlers::{Dispatcher, DispatcherBuilder, EventHandler, FnHandler};
pub use id::{MISC_COLLECTION, TableId};
pub use mapper::{FieldCodec, FieldDesc, ID_KEY, IdentityMap, Mapper, TABLE_FIELDS};
pub use query::Snapshots;
pub use registry::Registry;
pub use repository::Repository;
pub use storage::{Document, FileStorage, MemoryStorage, Storage};
pub use table::{PAYLOAD_FIELD, Table, TableKind, TableSnapshot, UPDATED_AT_FIELD};
pub use uow::UnitOfWork;
