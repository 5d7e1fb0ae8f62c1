//! Bubblewrap isolation for launched programs.
//!
//! The host root is bound read-only so the Wine loader and its libraries
//! resolve everywhere; writable access is limited per mode:
//!
//! - `full`: the home directory (and `~/Downloads`)
//! - `strict`: only the NORUN data and cache directories plus `~/Downloads`
//!
//! GPU nodes, the X11 sockets and `XDG_RUNTIME_DIR` (Wayland, D-Bus) are
//! bound when present.

use crate::models::Sandbox;
use crate::services::doctor::which;
use camino::{Utf8Path, Utf8PathBuf};
use tokio::process::Command;

/// Host paths a sandbox may expose, gathered once per launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostPaths {
    pub home: Option<Utf8PathBuf>,
    pub downloads: Option<Utf8PathBuf>,
    pub norun_dirs: Vec<Utf8PathBuf>,
    pub xdg_runtime_dir: Option<Utf8PathBuf>,
    pub x11_sockets: Vec<Utf8PathBuf>,
    pub xauthority: Option<Utf8PathBuf>,
    pub dri: Option<Utf8PathBuf>,
}

impl HostPaths {
    /// Inspect the current environment. `norun_dirs` are the data and cache
    /// roots, which strict mode keeps writable.
    pub fn detect(norun_dirs: &[&Utf8Path]) -> Self {
        let existing = |path: Utf8PathBuf| path.exists().then_some(path);
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(Utf8PathBuf::from)
        };

        let home = var("HOME");
        let downloads = home
            .as_ref()
            .and_then(|home| existing(home.join("Downloads")));

        let x11_sockets = if var("DISPLAY").is_some() {
            ["/tmp/.X11-unix", "/tmp/.ICE-unix"]
                .into_iter()
                .filter_map(|p| existing(Utf8PathBuf::from(p)))
                .collect()
        } else {
            Vec::new()
        };

        let xauthority = var("XAUTHORITY")
            .or_else(|| home.as_ref().map(|h| h.join(".Xauthority")))
            .and_then(existing);

        Self {
            downloads,
            norun_dirs: norun_dirs
                .iter()
                .filter(|dir| dir.exists())
                .map(|dir| dir.to_path_buf())
                .collect(),
            xdg_runtime_dir: var("XDG_RUNTIME_DIR").and_then(existing),
            x11_sockets,
            xauthority,
            dri: existing(Utf8PathBuf::from("/dev/dri")),
            home,
        }
    }
}

/// The bwrap arguments placed before `--` for `mode`.
pub fn bwrap_args(mode: Sandbox, host: &HostPaths) -> Vec<String> {
    let mut args: Vec<String> = [
        "--unshare-all",
        "--share-net",
        "--die-with-parent",
        "--new-session",
        "--dev-bind",
        "/dev",
        "/dev",
        "--ro-bind",
        "/",
        "/",
        "--proc",
        "/proc",
        "--tmpfs",
        "/tmp",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let mut bind = |flag: &str, path: &Utf8Path| {
        args.extend([flag.to_string(), path.to_string(), path.to_string()]);
    };

    if let Some(dri) = &host.dri {
        bind("--dev-bind", dri);
    }
    if let Some(runtime_dir) = &host.xdg_runtime_dir {
        bind("--bind", runtime_dir);
    }
    for socket in &host.x11_sockets {
        bind("--bind", socket);
    }

    match mode {
        Sandbox::Off => {}
        Sandbox::Full => {
            if let Some(home) = &host.home {
                bind("--bind", home);
            }
        }
        Sandbox::Strict => {
            for dir in &host.norun_dirs {
                bind("--bind", dir);
            }
            if let Some(xauth) = &host.xauthority {
                bind("--ro-bind", xauth);
            }
        }
    }
    if let Some(downloads) = &host.downloads {
        bind("--bind", downloads);
    }

    args
}

/// Rebuild `cmd` to run under `bwrap`, keeping its environment and working
/// directory.
///
/// The wrapped program is resolved to an absolute path first, since `PATH`
/// lookups inside the namespace can differ. A wrapped `wine` also gets
/// `WINESERVER` so it finds its server.
pub fn wrap(cmd: &Command, bwrap: &str, mode: Sandbox, host: &HostPaths) -> Command {
    let inner = cmd.as_std();
    let program = inner.get_program().to_string_lossy().to_string();
    let resolved = which(&program)
        .map(|p| p.to_string())
        .unwrap_or_else(|| program.clone());

    let mut wrapped = Command::new(bwrap);
    wrapped
        .args(bwrap_args(mode, host))
        .arg("--")
        .arg(&resolved)
        .args(inner.get_args());

    for (key, value) in inner.get_envs() {
        match value {
            Some(value) => wrapped.env(key, value),
            None => wrapped.env_remove(key),
        };
    }
    if matches!(
        Utf8Path::new(&resolved).file_name(),
        Some("wine") | Some("wine64")
    ) {
        if let Some(server) = which("wineserver") {
            wrapped.env("WINESERVER", server.as_str());
        }
    }
    if let Some(dir) = inner.get_current_dir() {
        wrapped.current_dir(dir);
    }

    tracing::debug!("Sandboxing {} ({} mode)", resolved, mode);
    wrapped
}
