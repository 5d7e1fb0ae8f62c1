//! Shared fixtures for integration tests.
//!
//! The runtimes here stand in for Wine: "executables" are shell scripts run
//! through `/bin/sh`, bootstrap just creates `drive_c` and winetricks runs
//! are recorded instead of executed.

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use norun::models::{RuntimeVersion, Settings, Toggles};
use norun::services::{CompatRuntime, Invocation};
use std::fs;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::process::Command;

/// Runs executables as shell scripts and counts setup commands.
#[derive(Default)]
pub struct ShellRuntime {
    pub bootstraps: AtomicUsize,
    pub toggle_calls: AtomicUsize,
    pub winetricks: Mutex<Vec<Vec<String>>>,
    /// When set, bootstrap exits non-zero.
    pub fail_bootstrap: bool,
}

impl ShellRuntime {
    pub fn failing() -> Self {
        Self {
            fail_bootstrap: true,
            ..Self::default()
        }
    }

    pub fn bootstraps(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }

    pub fn toggle_calls(&self) -> usize {
        self.toggle_calls.load(Ordering::SeqCst)
    }

    /// Verb lists passed to winetricks so far.
    pub fn winetricks_runs(&self) -> Vec<Vec<String>> {
        self.winetricks.lock().unwrap().clone()
    }
}

fn sh_true() -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("true");
    cmd
}

impl CompatRuntime for ShellRuntime {
    fn launch_command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg(invocation.executable.as_str())
            .args(&invocation.args)
            .envs(&invocation.environment);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn bootstrap_command(&self, prefix_root: &Utf8Path, _version: &RuntimeVersion) -> Command {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        let mut cmd = Command::new("sh");
        if self.fail_bootstrap {
            cmd.arg("-c").arg("echo 'wineboot: could not load kernel32.dll' >&2; exit 3");
        } else {
            cmd.arg("-c")
                .arg("mkdir -p \"$1/drive_c\"")
                .arg("sh")
                .arg(prefix_root.as_str());
        }
        cmd
    }

    fn toggle_commands(
        &self,
        _prefix_root: &Utf8Path,
        _version: &RuntimeVersion,
        _toggles: &Toggles,
    ) -> Vec<Command> {
        self.toggle_calls.fetch_add(1, Ordering::SeqCst);
        vec![sh_true()]
    }

    fn winetricks_command(
        &self,
        _prefix_root: &Utf8Path,
        _version: &RuntimeVersion,
        verbs: &[String],
    ) -> Command {
        self.winetricks.lock().unwrap().push(verbs.to_vec());
        sh_true()
    }
}

/// Runtime whose launcher binary does not exist.
pub struct MissingRuntime;

impl CompatRuntime for MissingRuntime {
    fn launch_command(&self, _invocation: &Invocation) -> Command {
        Command::new("/nonexistent/norun-test/wine")
    }

    fn bootstrap_command(&self, prefix_root: &Utf8Path, version: &RuntimeVersion) -> Command {
        ShellRuntime::default().bootstrap_command(prefix_root, version)
    }

    fn toggle_commands(
        &self,
        _prefix_root: &Utf8Path,
        _version: &RuntimeVersion,
        _toggles: &Toggles,
    ) -> Vec<Command> {
        Vec::new()
    }

    fn winetricks_command(
        &self,
        _prefix_root: &Utf8Path,
        _version: &RuntimeVersion,
        _verbs: &[String],
    ) -> Command {
        sh_true()
    }
}

/// Settings rooted in a fresh temporary directory, with a short grace period.
pub fn test_settings() -> (Settings, TempDir) {
    let temp = TempDir::new().unwrap();
    let root = utf8(temp.path());
    let mut settings = Settings::with_roots(root.join("data"), root.join("cache"));
    settings.grace_period_ms = 1000;
    settings.bootstrap_timeout_secs = 10;
    (settings, temp)
}

pub fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::try_from(path.to_path_buf()).unwrap()
}

/// Write a shell script standing in for a Windows executable.
pub fn write_script(dir: &Utf8Path, name: &str, body: &str) -> Utf8PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

pub fn wine9() -> RuntimeVersion {
    RuntimeVersion::new("wine-9.0").unwrap()
}

/// A stand-in for bubblewrap: prints its options to stderr, then runs the
/// wrapped command without any isolation.
pub fn write_fake_bwrap(dir: &Utf8Path) -> Utf8PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = write_script(
        dir,
        "bwrap",
        "#!/bin/sh\necho \"bwrap $*\" >&2\nwhile [ \"$1\" != \"--\" ]; do shift; done\nshift\nexec \"$@\"\n",
    );
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}
