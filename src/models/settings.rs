use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// User settings loaded from `norun.yaml` and `NORUN_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory holding one subdirectory per prefix.
    pub data_dir: Utf8PathBuf,

    pub shortcuts_dir: Utf8PathBuf,
    pub logs_dir: Utf8PathBuf,
    pub cache_dir: Utf8PathBuf,

    /// Where freedesktop `.desktop` entries go; unset disables them.
    #[serde(default)]
    pub applications_dir: Option<Utf8PathBuf>,

    #[serde(default = "default_wine_binary")]
    pub wine_binary: String,

    #[serde(default = "default_umu_run_binary")]
    pub umu_run_binary: String,

    #[serde(default = "default_winetricks_binary")]
    pub winetricks_binary: String,

    #[serde(default = "default_bwrap_binary")]
    pub bwrap_binary: String,

    #[serde(default = "default_runtime")]
    pub default_runtime: String,

    /// Wait between SIGTERM and SIGKILL when a launch times out.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    #[serde(default = "default_bootstrap_timeout_secs")]
    pub bootstrap_timeout_secs: u64,

    /// Limit for each winetricks run during provisioning.
    #[serde(default = "default_provision_timeout_secs")]
    pub provision_timeout_secs: u64,

    #[serde(default = "default_stderr_budget_bytes")]
    pub stderr_budget_bytes: usize,

    #[serde(default = "default_session_log")]
    pub session_log: bool,

    #[serde(default)]
    pub debug_mode: bool,
}

impl Settings {
    /// Settings rooted at `base` (data) and `cache` (shader caches).
    pub fn with_roots(base: impl Into<Utf8PathBuf>, cache: impl Into<Utf8PathBuf>) -> Self {
        let base = base.into();
        Self {
            data_dir: base.join("prefixes"),
            shortcuts_dir: base.join("shortcuts"),
            logs_dir: base.join("logs"),
            cache_dir: cache.into(),
            applications_dir: None,
            wine_binary: default_wine_binary(),
            umu_run_binary: default_umu_run_binary(),
            winetricks_binary: default_winetricks_binary(),
            bwrap_binary: default_bwrap_binary(),
            default_runtime: default_runtime(),
            grace_period_ms: default_grace_period_ms(),
            bootstrap_timeout_secs: default_bootstrap_timeout_secs(),
            provision_timeout_secs: default_provision_timeout_secs(),
            stderr_budget_bytes: default_stderr_budget_bytes(),
            session_log: default_session_log(),
            debug_mode: false,
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let mut settings = Self::with_roots(
            xdg_dir("XDG_DATA_HOME", ".local/share"),
            xdg_dir("XDG_CACHE_HOME", ".cache"),
        );
        settings.applications_dir =
            Some(xdg_base("XDG_DATA_HOME", ".local/share").join("applications"));
        settings
    }
}

fn xdg_base(var: &str, fallback: &str) -> Utf8PathBuf {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            Utf8PathBuf::from(home).join(fallback)
        })
}

fn xdg_dir(var: &str, fallback: &str) -> Utf8PathBuf {
    xdg_base(var, fallback).join("norun")
}

fn default_wine_binary() -> String {
    "wine".to_string()
}

fn default_umu_run_binary() -> String {
    "umu-run".to_string()
}

fn default_winetricks_binary() -> String {
    "winetricks".to_string()
}

fn default_bwrap_binary() -> String {
    "bwrap".to_string()
}

fn default_runtime() -> String {
    "wine".to_string()
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_bootstrap_timeout_secs() -> u64 {
    300
}

fn default_provision_timeout_secs() -> u64 {
    1800
}

fn default_stderr_budget_bytes() -> usize {
    64 * 1024
}

fn default_session_log() -> bool {
    true
}
