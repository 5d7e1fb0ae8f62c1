//! Data models for NORUN.
//!
//! - [`Prefix`]: an isolated Wine/Proton environment and its sidecar metadata
//! - [`Profile`]: winetricks provisioning applied at bootstrap
//! - [`Toggles`] / [`ToggleOverrides`]: typed runtime options (virtual desktop, DXVK,
//!   sandbox, env)
//! - [`LaunchRequest`] / [`RunResult`]: one launch and its outcome
//! - [`Shortcut`]: a persisted launch template
//! - [`Settings`]: user configuration
//!
//! All persisted structs derive `Serialize`/`Deserialize` and are stored as YAML.

pub mod launch;
pub mod prefix;
pub mod profile;
pub mod settings;
pub mod shortcut;
pub mod toggles;

pub use launch::{LaunchRequest, RunResult, TerminalStatus};
pub use prefix::{
    Prefix, PrefixStatus, RuntimeKind, RuntimeVersion, choose_runtime, validate_identifier,
};
pub use profile::{GRAPHICS_VERBS, Profile, graphics_verbs};
pub use settings::Settings;
pub use shortcut::Shortcut;
pub use toggles::{
    Sandbox, ToggleOverrides, Toggles, VirtualDesktop, parse_env_pair, parse_switch,
};
