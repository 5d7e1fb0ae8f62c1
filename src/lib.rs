// NORUN - isolated Wine/Proton prefixes for Windows programs
//
// This is the library crate containing prefix management, process
// supervision and shortcut persistence. The binary crate (main.rs) provides
// the command-line entry point.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use error::{NorunError, Result};
pub use models::{LaunchRequest, Prefix, PrefixStatus, RunResult, Settings, Shortcut, Toggles};
pub use services::{PrefixLifecycle, PrefixStore, RunSession, ShortcutExporter};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
