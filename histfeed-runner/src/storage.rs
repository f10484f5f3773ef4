//! Bucket-shaped persistence.
//!
//! - [`ObjectStore`] is the byte-level seam: buckets and keys in, bytes out.
//! - [`read_value`] / [`write_table`] add the typed layer on top, dispatching
//!   on the key suffix (`.csv` tables, `.txt` line lists).
//! - [`LocalStore`] is the filesystem-backed store used by the CLI; tests
//!   substitute their own recording implementations.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use thiserror::Error;

use histfeed_core::dataset::{Dataset, DatasetError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("key {key} has an unsupported suffix (expected .csv or .txt)")]
    UnsupportedKey { key: String },

    #[error("tables are only written to .csv keys, got {key}")]
    NonCsvWrite { key: String },

    #[error("object {key} is not valid UTF-8")]
    Utf8 { key: String },

    #[error("table error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("frame error: {0}")]
    Frame(#[from] PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-level storage seam.
pub trait ObjectStore: Send + Sync {
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// A stored object decoded according to its key suffix.
#[derive(Debug)]
pub enum StoredValue {
    /// A `.csv` object parsed into a frame. Callers decide whether it is a
    /// close table or something looser like the symbol universe.
    Table(DataFrame),
    /// A `.txt` object split into lines, with the trailing blank line (the
    /// artifact of a final newline) removed.
    Lines(Vec<String>),
}

/// Fetch an object and decode it by key suffix.
pub fn read_value(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
) -> Result<StoredValue, StorageError> {
    let bytes = store.get(bucket, key)?;
    if key.ends_with(".csv") {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()?;
        Ok(StoredValue::Table(df))
    } else if key.ends_with(".txt") {
        let text = String::from_utf8(bytes).map_err(|_| StorageError::Utf8 {
            key: key.to_string(),
        })?;
        let lines = text.lines().map(str::to_string).collect();
        Ok(StoredValue::Lines(lines))
    } else {
        Err(StorageError::UnsupportedKey {
            key: key.to_string(),
        })
    }
}

/// Serialize a close table to CSV and store it under a `.csv` key.
///
/// Returns the bytes that were written so callers can fingerprint exactly
/// what landed in storage.
pub fn write_table(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    table: &Dataset,
) -> Result<Vec<u8>, StorageError> {
    if !key.ends_with(".csv") {
        return Err(StorageError::NonCsvWrite {
            key: key.to_string(),
        });
    }
    let bytes = table.to_csv_bytes()?;
    store.put(bucket, key, &bytes)?;
    Ok(bytes)
}

/// Filesystem-backed store rooted at a directory; `bucket/key` maps to a
/// relative path under the root.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

impl ObjectStore for LocalStore {
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.object_path(bucket, key).is_file())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write to a sidecar then rename, so readers never observe a
        // half-written object.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string());
        let tmp = path.with_file_name(format!("{file_name}.tmp"));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
