//! Engine configuration and assembly.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::bus::{BusReport, EventBus};
use crate::error::{ConfigError, SyncError};
use crate::event::Event;
use crate::gateway::Gateways;
use crate::handlers::Dispatcher;
use crate::mapper::Mapper;
use crate::query::Snapshots;
use crate::registry::Registry;
use crate::storage::{FileStorage, MemoryStorage, Storage};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "data";

/// Settings read from a TOML file.
///
/// ```toml
/// namespace = "data"
/// storage_dir = "/var/lib/tablesync"
/// max_events = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Database all tables live in.
    pub namespace: String,
    /// Directory for [`FileStorage`]; tables stay in memory when unset.
    pub storage_dir: Option<PathBuf>,
    /// Upper bound on the tasks of one cascade.
    pub max_events: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            storage_dir: None,
            max_events: None,
        }
    }
}

impl SyncConfig {
    /// Parse a TOML document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}

/// A ready-to-use engine: registry, storage, dispatcher and bus wired
/// together.
///
/// Cheap to clone; clones share the identity map and storage.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    bus: EventBus,
    snapshots: Snapshots,
}

impl SyncEngine {
    /// Start configuring an engine.
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    /// Run the cascade started by `seed` to completion, blocking the caller.
    ///
    /// # Errors
    ///
    /// See [`EventBus::submit`].
    pub fn submit(&self, seed: Event) -> Result<BusReport, SyncError> {
        self.bus.submit(seed)
    }

    /// Run the cascade started by `seed` to completion.
    ///
    /// # Errors
    ///
    /// See [`EventBus::drive`].
    pub async fn drive(&self, seed: Event) -> Result<BusReport, SyncError> {
        self.bus.drive(seed).await
    }

    /// Read-only queries over the engine's tables.
    pub fn snapshots(&self) -> &Snapshots {
        &self.snapshots
    }

    /// Registry addressing the engine's tables.
    pub fn registry(&self) -> &Registry {
        self.bus.mapper().registry()
    }
}

/// Builder for [`SyncEngine`].
///
/// # Examples
///
/// ```
/// use tablesync::{FetchError, FetchRequest, FnGateway, Frame, Gateways, SyncEngine};
/// use std::sync::Arc;
///
/// let offline = FnGateway::new(|_request: FetchRequest| async {
///     Err::<Frame, _>(FetchError::Transport {
///         source_name: "example".into(),
///         message: "offline".into(),
///     })
/// });
/// let engine = SyncEngine::builder()
///     .namespace("test")
///     .gateways(Gateways::uniform(Arc::new(offline)))
///     .build()
///     .expect("complete configuration");
/// assert_eq!(engine.registry().namespace(), "test");
/// ```
#[derive(Default)]
pub struct SyncEngineBuilder {
    config: SyncConfig,
    gateways: Option<Gateways>,
    registry: Option<Registry>,
    storage: Option<Arc<dyn Storage>>,
    dispatcher: Option<Dispatcher>,
}

impl SyncEngineBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Database all tables live in.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Persist tables as JSON files under `dir`.
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = Some(dir.into());
        self
    }

    /// Abort cascades running more than `limit` tasks.
    pub fn max_events(mut self, limit: usize) -> Self {
        self.config.max_events = Some(limit);
        self
    }

    /// Data sources of the standard table kinds.
    pub fn gateways(mut self, gateways: Gateways) -> Self {
        self.gateways = Some(gateways);
        self
    }

    /// Use `registry` instead of the standard one; its namespace wins over
    /// the configured one.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use `storage`, overriding any storage directory.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use `dispatcher` instead of [`Dispatcher::standard`].
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Assemble the engine.
    ///
    /// Each engine owns its identity map, so a table is shared only among
    /// the handlers of one engine. Two engines over the same storage (the
    /// same `storage_dir`, say) would hold independent copies of each table
    /// and overwrite each other's commits; run one engine per store.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Incomplete`] if neither gateways nor a registry
    /// were supplied.
    pub fn build(self) -> Result<SyncEngine, ConfigError> {
        let registry = match (self.registry, &self.gateways) {
            (Some(registry), _) => registry,
            (None, Some(gateways)) => Registry::standard(self.config.namespace.clone(), gateways),
            (None, None) => return Err(ConfigError::Incomplete("gateways or a registry")),
        };
        let storage: Arc<dyn Storage> = match (self.storage, self.config.storage_dir) {
            (Some(storage), _) => storage,
            (None, Some(dir)) => Arc::new(FileStorage::new(dir)),
            (None, None) => Arc::new(MemoryStorage::new()),
        };
        let dispatcher = self.dispatcher.unwrap_or_else(Dispatcher::standard);

        let mapper = Mapper::new(registry, storage);
        tracing::info!(
            namespace = mapper.registry().namespace(),
            max_events = ?self.config.max_events,
            "sync engine ready"
        );
        Ok(SyncEngine {
            snapshots: Snapshots::new(mapper.clone()),
            bus: EventBus::new(mapper, dispatcher).with_max_events(self.config.max_events),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::test_fixtures::silent_gateways;

    #[test]
    fn missing_keys_take_defaults() {
        let config = SyncConfig::from_toml_str("max_events = 50").expect("parse");
        assert_eq!(
            config,
            SyncConfig {
                namespace: "data".into(),
                storage_dir: None,
                max_events: Some(50),
            }
        );
        assert_eq!(SyncConfig::from_toml_str("").expect("empty"), SyncConfig::default());
    }

    #[test]
    fn full_document_parses() {
        let config = SyncConfig::from_toml_str(
            r#"
            namespace = "prod"
            storage_dir = "/var/lib/tablesync"
            max_events = 10000
            "#,
        )
        .expect("parse");
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.storage_dir, Some(PathBuf::from("/var/lib/tablesync")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SyncConfig::from_toml_str("namespce = \"x\"").expect_err("typo");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn builder_requires_a_data_source() {
        let err = SyncEngine::builder().build().expect_err("no gateways");
        assert!(matches!(err, ConfigError::Incomplete(_)));
    }

    #[test]
    fn builder_applies_config() {
        let engine = SyncEngine::builder()
            .config(SyncConfig {
                namespace: "prod".into(),
                ..SyncConfig::default()
            })
            .gateways(silent_gateways())
            .build()
            .expect("build");
        assert_eq!(engine.registry().namespace(), "prod");
        assert_eq!(engine.registry().groups().count(), 7);
    }

    #[tokio::test]
    async fn fresh_engine_has_no_data() {
        let engine = SyncEngine::builder()
            .gateways(silent_gateways())
            .build()
            .expect("build");
        let err = engine
            .snapshots()
            .latest_singleton(crate::tables::USD)
            .await
            .expect_err("never loaded");
        assert!(matches!(err, SyncError::NeverUpdated(_)));
    }
}
