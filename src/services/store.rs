//! On-disk registry of prefixes.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/
//!   .locks/<id>.lock        advisory locks
//!   <id>/norun.yaml         sidecar metadata (id, runtime, status, toggles)
//!   <id>/drive_c/...        runtime state written by wineboot
//! ```
//!
//! Nothing is cached in memory; every call reads the filesystem fresh.

use crate::error::{NorunError, Result};
use crate::models::{Prefix, PrefixStatus, Profile, RuntimeVersion, Toggles, validate_identifier};
use crate::services::lock::PrefixLock;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;

/// Sidecar metadata file inside each prefix root.
pub const METADATA_FILE: &str = "norun.yaml";

const TEMP_PREFIX: &str = ".tmp-";

/// Registry of prefixes keyed by ID, one directory each.
#[derive(Debug, Clone)]
pub struct PrefixStore {
    data_dir: Utf8PathBuf,
}

impl PrefixStore {
    /// Open (and create if needed) the registry at `data_dir`.
    pub fn new<P: AsRef<Utf8Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    /// Filesystem root a prefix with this ID lives at.
    pub fn prefix_root(&self, id: &str) -> Utf8PathBuf {
        self.data_dir.join(id)
    }

    pub fn exists(&self, id: &str) -> bool {
        validate_identifier(id).is_ok() && self.metadata_path(id).is_file()
    }

    /// Register a new prefix in `uninitialized` state with the default profile.
    pub fn create(&self, id: &str, runtime_version: &RuntimeVersion) -> Result<Prefix> {
        self.create_with_profile(id, runtime_version, Profile::default())
    }

    /// Register a new prefix in `uninitialized` state.
    ///
    /// The directory and its sidecar are assembled under a temporary name and
    /// renamed into place, so readers never observe a half-written prefix.
    pub fn create_with_profile(
        &self,
        id: &str,
        runtime_version: &RuntimeVersion,
        profile: Profile,
    ) -> Result<Prefix> {
        validate_identifier(id)?;
        let _store_lock = PrefixLock::acquire_store(&self.data_dir)?;
        self.create_locked(id, runtime_version, profile)
    }

    /// [`create_with_profile`](Self::create_with_profile) for async callers;
    /// waiting for the store lock happens on the blocking pool.
    pub async fn create_async(
        &self,
        id: &str,
        runtime_version: &RuntimeVersion,
        profile: Profile,
    ) -> Result<Prefix> {
        validate_identifier(id)?;
        let _store_lock = PrefixLock::acquire_store_async(&self.data_dir).await?;
        self.create_locked(id, runtime_version, profile)
    }

    /// Caller holds the store lock.
    fn create_locked(
        &self,
        id: &str,
        runtime_version: &RuntimeVersion,
        profile: Profile,
    ) -> Result<Prefix> {
        let root = self.prefix_root(id);
        if root.exists() {
            return Err(NorunError::AlreadyExists(id.to_string()));
        }

        let seq = self.next_seq()?;
        let prefix = Prefix {
            id: id.to_string(),
            name: id.to_string(),
            runtime_version: runtime_version.clone(),
            status: PrefixStatus::Uninitialized,
            created_at: Utc::now(),
            seq,
            profile,
            toggles: Toggles::default(),
            root: root.clone(),
        };

        let temp = self
            .data_dir
            .join(format!("{}{}-{}", TEMP_PREFIX, id, std::process::id()));
        if temp.exists() {
            fs::remove_dir_all(&temp)?;
        }
        fs::create_dir_all(&temp)?;

        let staged = write_metadata(&temp, &prefix).and_then(|_| {
            fs::rename(&temp, &root).map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists | ErrorKind::DirectoryNotEmpty => {
                    NorunError::AlreadyExists(id.to_string())
                }
                _ => NorunError::Io(e),
            })
        });

        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&temp);
            return Err(e);
        }

        tracing::info!(
            "Created prefix {} (runtime {}, profile {}) at {}",
            id,
            runtime_version,
            profile,
            root
        );
        Ok(prefix)
    }

    /// Load a prefix by ID.
    pub fn get(&self, id: &str) -> Result<Prefix> {
        validate_identifier(id)?;
        let path = self.metadata_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(NorunError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut prefix: Prefix =
            serde_yaml_ng::from_str(&contents).map_err(|e| NorunError::Metadata {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        if prefix.id != id {
            return Err(NorunError::Metadata {
                path: path.to_string(),
                reason: format!("sidecar names prefix {:?}", prefix.id),
            });
        }

        prefix.root = self.prefix_root(id);
        Ok(prefix)
    }

    /// All readable prefixes, in creation order.
    ///
    /// A prefix whose sidecar cannot be parsed, or which disappears while
    /// listing, is skipped with a warning rather than failing the whole list.
    pub fn list(&self) -> Result<Vec<Prefix>> {
        let mut prefixes = Vec::new();

        for name in self.registered_ids()? {
            match self.get(&name) {
                Ok(prefix) => prefixes.push(prefix),
                Err(NorunError::NotFound(_)) => {
                    tracing::debug!("Prefix {} vanished while listing", name);
                }
                Err(e @ (NorunError::Metadata { .. } | NorunError::InvalidId(_))) => {
                    tracing::warn!("Skipping prefix {}: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }

        prefixes.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.id.cmp(&b.id)));
        Ok(prefixes)
    }

    /// Directory names under the data dir that carry a sidecar.
    fn registered_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !self.metadata_path(&name).is_file() {
                continue;
            }
            ids.push(name);
        }
        Ok(ids)
    }

    /// Persist changed metadata for an existing prefix.
    ///
    /// Callers are expected to hold the prefix's lock.
    pub fn update(&self, prefix: &Prefix) -> Result<()> {
        validate_identifier(&prefix.id)?;
        let root = self.prefix_root(&prefix.id);
        if !self.metadata_path(&prefix.id).is_file() {
            return Err(NorunError::NotFound(prefix.id.clone()));
        }
        write_metadata(&root, prefix)?;
        tracing::debug!("Updated metadata for prefix {} ({})", prefix.id, prefix.status);
        Ok(())
    }

    /// Remove a prefix and everything under its root.
    pub fn delete(&self, id: &str) -> Result<()> {
        validate_identifier(id)?;
        let _lock = PrefixLock::acquire(&self.data_dir, id)?;

        let root = self.prefix_root(id);
        if !self.metadata_path(id).is_file() {
            return Err(NorunError::NotFound(id.to_string()));
        }

        // Drop the sidecar first so a failure midway leaves no half-listed prefix.
        fs::remove_file(self.metadata_path(id))?;
        fs::remove_dir_all(&root)?;

        tracing::info!("Deleted prefix {} at {}", id, root);
        Ok(())
    }

    fn metadata_path(&self, id: &str) -> Utf8PathBuf {
        self.prefix_root(id).join(METADATA_FILE)
    }

    /// One past the highest readable sequence, and never below the number of
    /// registered prefixes, since unreadable sidecars hide their own.
    fn next_seq(&self) -> Result<u64> {
        let after_max = self.list()?.iter().map(|p| p.seq + 1).max().unwrap_or(0);
        let registered = self.registered_ids()?.len() as u64;
        Ok(after_max.max(registered))
    }
}

/// Write the sidecar via a temp file and rename.
fn write_metadata(root: &Utf8Path, prefix: &Prefix) -> Result<()> {
    let yaml = serde_yaml_ng::to_string(prefix).map_err(|e| NorunError::Metadata {
        path: root.join(METADATA_FILE).to_string(),
        reason: e.to_string(),
    })?;

    let tmp = root.join(format!("{}.tmp", METADATA_FILE));
    fs::write(&tmp, yaml)?;
    fs::rename(&tmp, root.join(METADATA_FILE))?;
    Ok(())
}
