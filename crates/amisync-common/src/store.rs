//! JSON document persistence.
//!
//! Templates, task lists, and the image cache snapshot are all JSON
//! documents addressed by path. [`JsonStore`] is the seam between the
//! engine and the disk so that tests can run against [`MemoryJsonStore`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;

use crate::error::{AmisyncError, Result};

/// Reads and writes whole JSON documents.
pub trait JsonStore: Send + Sync + fmt::Debug {
    /// Reads the document at `path`.
    ///
    /// Returns `Ok(None)` when nothing is stored there, which is distinct
    /// from an empty document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be read or parsed.
    fn read(&self, path: &Path) -> Result<Option<Value>>;

    /// Replaces the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    fn write(&self, path: &Path, document: &Value) -> Result<()>;
}

/// Store backed by the local filesystem.
///
/// Documents are written pretty-printed with four-space indentation.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsJsonStore;

impl FsJsonStore {
    /// Creates a filesystem store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl JsonStore for FsJsonStore {
    fn read(&self, path: &Path) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| AmisyncError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let document = serde_json::from_str(&content)?;
        Ok(Some(document))
    }

    fn write(&self, path: &Path, document: &Value) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AmisyncError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let mut buf = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        document.serialize(&mut ser)?;
        std::fs::write(path, buf).map_err(|e| AmisyncError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "document saved");
        Ok(())
    }
}

/// In-memory store, keyed by path.
#[derive(Debug, Default)]
pub struct MemoryJsonStore {
    documents: Mutex<HashMap<PathBuf, Value>>,
}

impl MemoryJsonStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with a single document.
    #[must_use]
    pub fn with_document(path: impl Into<PathBuf>, document: Value) -> Self {
        let store = Self::new();
        store.insert(path, document);
        store
    }

    /// Stores `document` at `path`, replacing any previous one.
    pub fn insert(&self, path: impl Into<PathBuf>, document: Value) {
        let _ = self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), document);
    }

    /// Returns a copy of the document at `path`, if any.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Value> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

impl JsonStore for MemoryJsonStore {
    fn read(&self, path: &Path) -> Result<Option<Value>> {
        Ok(self.get(path))
    }

    fn write(&self, path: &Path, document: &Value) -> Result<()> {
        self.insert(path, document.clone());
        Ok(())
    }
}
