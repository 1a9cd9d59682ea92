//! Document storage trait and built-in backends.
//!
//! The engine needs only keyed reads and upserts. Documents are JSON objects
//! addressed by `(database, collection, key)`; the mapper derives all three
//! from a [`TableId`](crate::TableId).

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StorageError;

/// A stored document.
pub type Document = Map<String, Value>;

/// Keyed document store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the document stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails or the stored document
    /// cannot be parsed.
    async fn get(
        &self,
        database: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Document>, StorageError>;

    /// Insert or overwrite the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    async fn replace(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        document: Document,
    ) -> Result<(), StorageError>;
}

type Address = (String, String, String);

fn address(database: &str, collection: &str, key: &str) -> Address {
    (database.to_owned(), collection.to_owned(), key.to_owned())
}

/// In-process backend.
///
/// Counts every [`replace`](Storage::replace) so tests can assert how many
/// writes a run issued.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    documents: RwLock<HashMap<Address, Document>>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `replace` calls served so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(
        &self,
        database: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Document>, StorageError> {
        let documents = self
            .documents
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(documents.get(&address(database, collection, key)).cloned())
    }

    async fn replace(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        document: Document,
    ) -> Result<(), StorageError> {
        self.documents
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(address(database, collection, key), document);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Directory-backed store.
///
/// Documents live at `<base_dir>/<database>/<collection>/<key>.json`. Writes
/// go to a temporary file that is then renamed over the target, so readers
/// never observe a partially written document.
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    /// Create a store rooted at `base_dir`. Nothing is created on disk until
    /// the first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root directory of the store.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the document `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if any part would escape its
    /// directory.
    pub fn document_path(
        &self,
        database: &str,
        collection: &str,
        key: &str,
    ) -> Result<PathBuf, StorageError> {
        for part in [database, collection, key] {
            if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
                return Err(StorageError::Backend(format!(
                    "invalid path component: {part:?}"
                )));
            }
        }
        Ok(self
            .base_dir
            .join(database)
            .join(collection)
            .join(format!("{key}.json")))
    }

    async fn blocking<T, F>(f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StorageError::Backend(format!("storage task failed: {e}")))?
    }
}

fn read_document(path: &Path) -> Result<Option<Document>, StorageError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<Document>(&bytes) {
        Ok(doc) => Ok(Some(doc)),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "stored document is not a JSON object"
            );
            Err(e.into())
        }
    }
}

fn write_document(path: &Path, document: &Document) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::Backend(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir)?;

    // Unique per write, so concurrent replaces of one key never share it.
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, document)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(
        &self,
        database: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Document>, StorageError> {
        let path = self.document_path(database, collection, key)?;
        Self::blocking(move || read_document(&path)).await
    }

    async fn replace(
        &self,
        database: &str,
        collection: &str,
        key: &str,
        document: Document,
    ) -> Result<(), StorageError> {
        let path = self.document_path(database, collection, key)?;
        Self::blocking(move || write_document(&path, &document)).await
    }
}
