//! Durable batch of transactions awaiting multi-party approval.
//!
//! The batch is a single JSON array of `{to, data, value}` objects:
//!
//! ```text
//! deployments/pending-safe-batch.json
//! [
//!   { "to": "0x…", "data": "0x…", "value": "0" },
//!   …
//! ]
//! ```
//!
//! The file exists only between the first deferred correction and the next
//! successful dispatch, so an interrupted run picks up where it stopped.
//! Appends are read-modify-write of the whole file and assume a single
//! writer; there is no locking.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{prelude::*, prepare::PreparedTransaction, Error};

/// File-backed, deduplicating queue of [`PreparedTransaction`]s.
#[derive(Debug, Clone)]
pub struct BatchFile {
    path: PathBuf,
}

impl BatchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `tx` unless a structurally equal entry is already queued.
    ///
    /// Returns `true` when the entry was added.
    pub fn append(&self, tx: PreparedTransaction) -> Result<bool> {
        let mut entries = self.load()?;
        if entries.contains(&tx) {
            debug!(
                path = %self.path.display(),
                to = %tx.to(),
                "Transaction already batched"
            );
            return Ok(false);
        }

        entries.push(tx);
        self.store(&entries)?;
        info!(
            path = %self.path.display(),
            pending = entries.len(),
            "Transaction added to batch"
        );
        Ok(true)
    }

    /// All queued entries in insertion order. The file is left untouched.
    pub fn drain(&self) -> Result<Vec<PreparedTransaction>> {
        self.load()
    }

    /// Delete the backing file. A missing file is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Batch cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::batch_file(&self.path, e)),
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn load(&self) -> Result<Vec<PreparedTransaction>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::batch_file(&self.path, e)),
        };
        serde_json::from_str(&json)
            .map_err(|e| Error::batch_file(&self.path, format!("JSON deserialize: {e}")))
    }

    /// Write the full array: `.tmp` sibling first, then rename over the batch.
    fn store(&self, entries: &[PreparedTransaction]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::batch_file(&self.path, e))?;
        }

        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| Error::batch_file(&self.path, format!("JSON serialize: {e}")))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, json).map_err(|e| Error::batch_file(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| Error::batch_file(&self.path, e))?;
        Ok(())
    }
}
