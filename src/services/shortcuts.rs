//! Persisting launch templates as shortcuts.
//!
//! Each shortcut is `<shortcuts_dir>/<name>.yaml`. When an applications
//! directory is configured a freedesktop entry `norun-<name>.desktop` is
//! written next to it so the launch shows up in desktop menus.

use crate::error::{NorunError, Result};
use crate::models::{LaunchRequest, Shortcut, validate_identifier};
use crate::services::store::PrefixStore;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::ErrorKind;

const SHORTCUT_EXTENSION: &str = "yaml";

/// Writes, reads and removes shortcuts.
#[derive(Debug, Clone)]
pub struct ShortcutExporter {
    store: PrefixStore,
    shortcuts_dir: Utf8PathBuf,
    applications_dir: Option<Utf8PathBuf>,
}

impl ShortcutExporter {
    pub fn new<P: AsRef<Utf8Path>>(
        store: PrefixStore,
        shortcuts_dir: P,
        applications_dir: Option<Utf8PathBuf>,
    ) -> Result<Self> {
        let shortcuts_dir = shortcuts_dir.as_ref().to_path_buf();
        fs::create_dir_all(&shortcuts_dir)?;
        Ok(Self {
            store,
            shortcuts_dir,
            applications_dir,
        })
    }

    pub fn shortcuts_dir(&self) -> &Utf8Path {
        &self.shortcuts_dir
    }

    /// Persist `request` as shortcut `name` for prefix `prefix_id`.
    ///
    /// The prefix must exist now; nothing keeps it alive afterwards.
    /// Exporting under an existing name replaces that shortcut.
    pub fn export(
        &self,
        prefix_id: &str,
        request: &LaunchRequest,
        name: &str,
        icon: Option<Utf8PathBuf>,
    ) -> Result<Shortcut> {
        validate_identifier(name)?;
        match self.store.get(prefix_id) {
            Ok(_) => {}
            Err(NorunError::NotFound(_)) => {
                return Err(NorunError::PrefixNotFound(prefix_id.to_string()));
            }
            Err(e) => return Err(e),
        }

        let mut template = request.clone();
        template.prefix_id = prefix_id.to_string();

        let shortcut = Shortcut {
            name: name.to_string(),
            icon,
            request: template,
        };

        let yaml = serde_yaml_ng::to_string(&shortcut).map_err(|e| NorunError::Metadata {
            path: self.shortcut_path(name).to_string(),
            reason: e.to_string(),
        })?;
        let path = self.shortcut_path(name);
        let tmp = self.shortcuts_dir.join(format!(".{}.tmp", name));
        fs::write(&tmp, yaml)?;
        fs::rename(&tmp, &path)?;

        if let Some(apps) = &self.applications_dir {
            fs::create_dir_all(apps)?;
            fs::write(desktop_entry_path(apps, name), desktop_entry(&shortcut))?;
        }

        tracing::info!("Exported shortcut {} for prefix {} to {}", name, prefix_id, path);
        Ok(shortcut)
    }

    pub fn load(&self, name: &str) -> Result<Shortcut> {
        validate_identifier(name)?;
        let path = self.shortcut_path(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(NorunError::ShortcutNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        serde_yaml_ng::from_str(&contents).map_err(|e| NorunError::Metadata {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// All shortcuts, sorted by name.
    pub fn list(&self) -> Result<Vec<Shortcut>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.shortcuts_dir)? {
            let path = Utf8PathBuf::try_from(entry?.path())
                .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
            if path.extension() != Some(SHORTCUT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().filter(|s| !s.starts_with('.')) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names.iter().map(|name| self.load(name)).collect()
    }

    /// Delete a shortcut and its desktop entry.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        match fs::remove_file(self.shortcut_path(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(NorunError::ShortcutNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(apps) = &self.applications_dir {
            let entry = desktop_entry_path(apps, name);
            if entry.exists() {
                fs::remove_file(&entry)?;
            }
        }

        tracing::info!("Removed shortcut {}", name);
        Ok(())
    }

    fn shortcut_path(&self, name: &str) -> Utf8PathBuf {
        self.shortcuts_dir
            .join(format!("{}.{}", name, SHORTCUT_EXTENSION))
    }
}

fn desktop_entry_path(apps: &Utf8Path, name: &str) -> Utf8PathBuf {
    apps.join(format!("norun-{}.desktop", name))
}

/// Freedesktop entry that replays the shortcut through the CLI.
pub fn desktop_entry(shortcut: &Shortcut) -> String {
    let mut entry = format!(
        "[Desktop Entry]\nType=Application\nName={} (NORUN)\nExec=norun shortcut run {}\nTerminal=false\nCategories=Utility;\n",
        shortcut.name, shortcut.name
    );
    if let Some(icon) = &shortcut.icon {
        entry.push_str(&format!("Icon={}\n", icon));
    }
    entry
}
