//! Availability checks for the external tools NORUN drives.

use camino::Utf8PathBuf;
use std::path::Path;

/// Tools looked up by [`diagnose`].
pub const TOOLS: [&str; 5] = ["wine", "wineboot", "winetricks", "umu-run", "bwrap"];

/// Presence of one external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: String,
    pub path: Option<Utf8PathBuf>,
}

impl ToolStatus {
    pub fn found(&self) -> bool {
        self.path.is_some()
    }
}

/// Check each of [`TOOLS`] plus any configured binaries not already listed.
pub fn diagnose(extra: &[&str]) -> Vec<ToolStatus> {
    let mut names: Vec<&str> = TOOLS.to_vec();
    for name in extra {
        if !names.contains(name) {
            names.push(name);
        }
    }

    names
        .into_iter()
        .map(|name| ToolStatus {
            name: name.to_string(),
            path: which(name),
        })
        .collect()
}

/// Resolve `name` on `PATH`; names containing a slash are checked directly.
pub fn which(name: &str) -> Option<Utf8PathBuf> {
    if name.contains('/') {
        let path = Utf8PathBuf::from(name);
        return is_executable(path.as_std_path()).then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let full = dir.join(name);
        if is_executable(&full) {
            Utf8PathBuf::from_path_buf(full).ok()
        } else {
            None
        }
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
