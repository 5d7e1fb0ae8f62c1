use std::time::Duration;
use thiserror::Error;

/// Errors produced by prefix, session and shortcut operations.
///
/// Every kind stays distinct on its way to the caller so the CLI can render a
/// specific message and exit code. Nothing in the library collapses these
/// into a generic failure.
#[derive(Error, Debug)]
pub enum NorunError {
    #[error("Prefix {0} already exists")]
    AlreadyExists(String),

    #[error("Prefix {0} not found")]
    NotFound(String),

    #[error("Prefix {0} is broken; rerun with repair enabled")]
    PrefixBroken(String),

    #[error("Repair of prefix {id} failed: {reason}")]
    RepairFailed { id: String, reason: String },

    #[error("Prefix {id} is not ready (status: {status})")]
    PrefixNotReady { id: String, status: String },

    #[error("Shortcut references prefix {0}, which does not exist")]
    PrefixNotFound(String),

    #[error("Shortcut {shortcut} references deleted prefix {prefix}")]
    DanglingShortcut { shortcut: String, prefix: String },

    #[error("Shortcut {0} not found")]
    ShortcutNotFound(String),

    #[error("Failed to launch {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Bootstrap of prefix {id} failed: {reason}")]
    BootstrapFailed { id: String, reason: String },

    #[error("Invalid identifier {0:?}: use letters, digits, '.', '_' or '-' (max 64)")]
    InvalidId(String),

    #[error("Invalid toggle: {0}")]
    InvalidToggle(String),

    #[error("Unreadable metadata at {path}: {reason}")]
    Metadata { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NorunError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            NorunError::InvalidId(_) | NorunError::InvalidToggle(_) => 2,
            NorunError::NotFound(_)
            | NorunError::PrefixNotFound(_)
            | NorunError::ShortcutNotFound(_) => 3,
            NorunError::AlreadyExists(_) => 4,
            NorunError::PrefixBroken(_)
            | NorunError::RepairFailed { .. }
            | NorunError::PrefixNotReady { .. }
            | NorunError::BootstrapFailed { .. } => 5,
            NorunError::DanglingShortcut { .. } => 6,
            NorunError::LaunchFailed { .. } => 10,
            NorunError::Timeout(_) => 11,
            NorunError::Metadata { .. } | NorunError::Io(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, NorunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_family() {
        assert_eq!(NorunError::InvalidId("x y".into()).exit_code(), 2);
        assert_eq!(NorunError::NotFound("a".into()).exit_code(), 3);
        assert_eq!(NorunError::AlreadyExists("a".into()).exit_code(), 4);
        assert_eq!(NorunError::PrefixBroken("a".into()).exit_code(), 5);
        assert_eq!(
            NorunError::DanglingShortcut {
                shortcut: "s".into(),
                prefix: "p".into()
            }
            .exit_code(),
            6
        );
        assert_eq!(NorunError::Timeout(Duration::from_secs(1)).exit_code(), 11);
    }

    #[test]
    fn test_messages_name_the_prefix() {
        let err = NorunError::PrefixNotReady {
            id: "firefox-x64".into(),
            status: "uninitialized".into(),
        };
        assert!(err.to_string().contains("firefox-x64"));
        assert!(err.to_string().contains("uninitialized"));
    }
}
