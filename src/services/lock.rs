//! File-based advisory locks.
//!
//! Lock files live in `<data_dir>/.locks/`, outside the prefix directories, so
//! a delete can remove a prefix root while still holding its lock.

use crate::error::Result;
use camino::{Utf8Path, Utf8PathBuf};
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};

pub(crate) const LOCKS_DIR: &str = ".locks";

/// Name of the lock serializing writes to the registry itself.
const STORE_LOCK: &str = ".store";

/// An exclusive advisory lock, released when dropped.
#[derive(Debug)]
pub struct PrefixLock {
    _file: File,
    path: Utf8PathBuf,
}

impl PrefixLock {
    /// Block until the lock for `id` is held.
    pub fn acquire(data_dir: &Utf8Path, id: &str) -> Result<Self> {
        let dir = data_dir.join(LOCKS_DIR);
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.lock", id));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;

        tracing::debug!("Acquired lock {}", path);
        Ok(Self { _file: file, path })
    }

    /// Lock for registry-wide changes (sequence allocation).
    pub fn acquire_store(data_dir: &Utf8Path) -> Result<Self> {
        Self::acquire(data_dir, STORE_LOCK)
    }

    /// [`acquire_store`](Self::acquire_store) on the blocking pool.
    pub async fn acquire_store_async(data_dir: &Utf8Path) -> Result<Self> {
        Self::acquire_async(data_dir, STORE_LOCK).await
    }

    /// Acquire on the blocking pool so async callers don't stall a worker.
    pub async fn acquire_async(data_dir: &Utf8Path, id: &str) -> Result<Self> {
        let data_dir = data_dir.to_path_buf();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || Self::acquire(&data_dir, &id))
            .await
            .map_err(std::io::Error::other)?
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for PrefixLock {
    fn drop(&mut self) {
        tracing::debug!("Released lock {}", self.path);
    }
}
