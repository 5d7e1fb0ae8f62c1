//! Services module - prefix management and process supervision.
//!
//! These services hold the core of NORUN and have no dependency on the CLI,
//! so they can be driven from any frontend.
//!
//! # Components
//!
//! - [`PrefixStore`]: on-disk registry of prefixes, one directory plus a YAML
//!   sidecar each. Creation is atomic (stage, then rename).
//! - [`PrefixLifecycle`]: `ensure_ready` (create/bootstrap/provision/toggles/repair),
//!   health checks and destruction.
//! - [`RunSession`]: launches an executable in a ready prefix, enforces the
//!   timeout with SIGTERM then SIGKILL, and captures a bounded stderr tail.
//!   The optional bubblewrap sandbox lives in [`sandbox`].
//! - [`ShortcutExporter`]: persists launch templates and desktop entries.
//! - [`CompatRuntime`]: the seam to Wine/Proton; [`WineRuntime`] drives
//!   `wine`, `umu-run` and `winetricks`.
//!
//! Per-prefix advisory locks ([`PrefixLock`]) serialize `ensure_ready`,
//! `launch` and `delete` against the same prefix. Operations on different
//! prefixes run independently.
//!
//! # Usage Example
//!
//! ```ignore
//! use norun::services::{PrefixLifecycle, PrefixStore, RunSession, WineRuntime};
//!
//! let store = PrefixStore::new(&settings.data_dir)?;
//! let runtime = Arc::new(WineRuntime::new("wine", "umu-run"));
//! let lifecycle = PrefixLifecycle::new(store.clone(), runtime.clone(), settings.bootstrap_timeout());
//!
//! lifecycle.ensure_ready("firefox-x64", &version, &Toggles::default(), false).await?;
//!
//! let session = RunSession::new(store, runtime, &settings);
//! let result = session.launch(&LaunchRequest::new("setup.exe", "firefox-x64")).await?;
//! ```

pub mod doctor;
pub mod lifecycle;
pub mod lock;
pub mod runtime;
pub mod sandbox;
pub mod session;
pub mod shortcuts;
pub mod store;

pub use doctor::{ToolStatus, diagnose, which};
pub use lifecycle::{MAX_REPAIR_ATTEMPTS, PrefixLifecycle};
pub use lock::PrefixLock;
pub use runtime::{CompatRuntime, Invocation, WineRuntime, toggle_environment};
pub use sandbox::HostPaths;
pub use session::{RunSession, TailBuffer};
pub use shortcuts::{ShortcutExporter, desktop_entry};
pub use store::{METADATA_FILE, PrefixStore};
