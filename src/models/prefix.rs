use crate::error::{NorunError, Result};
use crate::models::{Profile, Toggles};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("Invalid identifier regex")
});

/// Check an identifier used as a directory or file name.
///
/// Shared by prefix IDs and shortcut names. A leading dot is refused so
/// identifiers never collide with the store's own `.locks`/`.tmp-*` entries.
pub fn validate_identifier(value: &str) -> Result<()> {
    if ID_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(NorunError::InvalidId(value.to_string()))
    }
}

/// Lifecycle status recorded in the prefix sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixStatus {
    Uninitialized,
    Ready,
    Broken,
}

impl fmt::Display for PrefixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrefixStatus::Uninitialized => "uninitialized",
            PrefixStatus::Ready => "ready",
            PrefixStatus::Broken => "broken",
        };
        f.write_str(s)
    }
}

/// Which launcher a runtime version goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Plain Wine (`wine`, `wineboot`).
    Wine,
    /// Proton through `umu-run`.
    Proton,
}

/// Wine/Proton build identifier such as `wine-9.0` or `GE-Proton9-20`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeVersion(String);

impl RuntimeVersion {
    pub fn new(version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        let trimmed = version.trim();
        if trimmed.is_empty() || trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(NorunError::InvalidToggle(format!(
                "runtime version {:?}",
                version
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> RuntimeKind {
        if self.0.to_ascii_lowercase().contains("proton") {
            RuntimeKind::Proton
        } else {
            RuntimeKind::Wine
        }
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pick a runtime for an installer, preferring Proton for game launchers and
/// modern graphics stacks.
pub fn choose_runtime(installer: &str, default: &RuntimeVersion) -> RuntimeVersion {
    const PROTON_HINTS: [&str; 7] = ["steam", "epic", "gog", "unity", "unreal", "dx12", "vulkan"];

    let lower = installer.to_ascii_lowercase();
    if default.kind() == RuntimeKind::Wine && PROTON_HINTS.iter().any(|hint| lower.contains(hint)) {
        tracing::debug!("Installer {} looks like a game, choosing Proton", installer);
        return RuntimeVersion("GE-Proton".to_string());
    }
    default.clone()
}

/// An isolated Wine/Proton environment.
///
/// Owned by [`PrefixStore`](crate::services::PrefixStore); the struct itself
/// is what gets written to the sidecar file, except `root`, which is derived
/// from the store location on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    pub id: String,
    pub name: String,
    pub runtime_version: RuntimeVersion,
    pub status: PrefixStatus,
    pub created_at: DateTime<Utc>,

    /// Insertion sequence, used to list prefixes in creation order.
    pub seq: u64,

    #[serde(default)]
    pub profile: Profile,

    #[serde(default)]
    pub toggles: Toggles,

    #[serde(skip)]
    pub root: Utf8PathBuf,
}

impl Prefix {
    pub fn is_ready(&self) -> bool {
        self.status == PrefixStatus::Ready
    }

    /// The emulated `C:` drive.
    pub fn drive_c(&self) -> Utf8PathBuf {
        self.root.join("drive_c")
    }
}
