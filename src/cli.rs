//! Command-line surface.
//!
//! [`Cli`] is the clap definition; [`App`] wires the services together from
//! [`Settings`] and executes one [`Commands`] value, returning the process
//! exit code.

use crate::error::NorunError;
use crate::models::{
    LaunchRequest, Prefix, Profile, RunResult, RuntimeVersion, Sandbox, Settings,
    ToggleOverrides, Toggles, VirtualDesktop, choose_runtime, parse_env_pair, parse_switch,
};
use crate::services::{
    CompatRuntime, PrefixLifecycle, PrefixStore, RunSession, ShortcutExporter, WineRuntime,
    diagnose,
};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "norun", author, version, about = "Run Windows programs in isolated Wine/Proton prefixes", long_about = None)]
pub struct Cli {
    /// Directory holding norun.yaml (default: $XDG_CONFIG_HOME/norun)
    #[arg(long, global = true)]
    pub config_dir: Option<Utf8PathBuf>,

    /// Debug logging, also mirrored to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a new, uninitialized prefix
    Create {
        id: String,
        #[command(flatten)]
        runtime: RuntimeArgs,
        /// Provisioning profile: general, dotnet, games or bare
        #[arg(long, value_parser = parse_profile, default_value = "general")]
        profile: Profile,
    },

    /// List prefixes in creation order
    List,

    /// Delete a prefix and everything inside it
    Delete { id: String },

    /// Create, bootstrap or repair a prefix and apply toggles
    Ensure {
        id: String,
        #[command(flatten)]
        runtime: RuntimeArgs,
        #[command(flatten)]
        toggles: ToggleArgs,
        /// Provisioning profile; changing it on a ready prefix re-bootstraps
        #[arg(long, value_parser = parse_profile)]
        profile: Option<Profile>,
        /// Retry bootstrap on a broken prefix
        #[arg(long)]
        repair: bool,
    },

    /// Verify a prefix on disk, marking it broken if drive_c is gone
    Status { id: String },

    /// Run an executable inside a ready prefix
    Launch {
        id: String,
        executable: Utf8PathBuf,
        #[command(flatten)]
        launch: LaunchArgs,
        /// Arguments passed to the executable
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Save a launch as a reusable shortcut
    Export {
        id: String,
        executable: Utf8PathBuf,
        /// Shortcut name
        #[arg(long)]
        name: String,
        /// Icon for the desktop entry
        #[arg(long)]
        icon: Option<Utf8PathBuf>,
        #[command(flatten)]
        launch: LaunchArgs,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Manage saved shortcuts
    Shortcut {
        #[command(subcommand)]
        command: ShortcutCommands,
    },

    /// Report which external tools are available
    Doctor,
}

#[derive(Subcommand, Debug)]
pub enum ShortcutCommands {
    /// List saved shortcuts
    List,
    /// Launch a saved shortcut
    Run { name: String },
    /// Remove a shortcut and its desktop entry
    Remove { name: String },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RuntimeArgs {
    /// Wine/Proton version, e.g. wine-9.0 or GE-Proton9-20
    #[arg(long)]
    pub runtime: Option<String>,

    /// Installer to guess a runtime from when --runtime is absent
    #[arg(long, conflicts_with = "runtime")]
    pub installer: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ToggleArgs {
    /// Virtual desktop as WxH (min 320x200) or off
    #[arg(long, value_name = "WxH|off", value_parser = parse_desktop)]
    pub desktop: Option<VirtualDesktop>,

    /// DXVK on or off
    #[arg(long, value_name = "on|off", value_parser = parse_dxvk)]
    pub dxvk: Option<bool>,

    /// Bubblewrap isolation for launches
    #[arg(long, value_name = "off|full|strict", value_parser = parse_sandbox)]
    pub sandbox: Option<Sandbox>,

    /// Extra environment variable (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,
}

impl ToggleArgs {
    pub fn overrides(&self) -> crate::Result<ToggleOverrides> {
        let env: IndexMap<String, String> = self.env.iter().cloned().collect();
        Ok(ToggleOverrides::new(self.desktop, self.dxvk, env)?.with_sandbox(self.sandbox))
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
    /// Working directory for the executable
    #[arg(long)]
    pub cwd: Option<Utf8PathBuf>,

    /// Seconds before the program is asked to stop, fractions allowed
    #[arg(long, value_name = "SECS", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    #[command(flatten)]
    pub toggles: ToggleArgs,
}

impl LaunchArgs {
    fn request(
        &self,
        id: &str,
        executable: Utf8PathBuf,
        args: Vec<String>,
    ) -> crate::Result<LaunchRequest> {
        let mut request = LaunchRequest::new(executable, id)
            .with_args(args)
            .with_overrides(self.toggles.overrides()?);
        if let Some(cwd) = &self.cwd {
            request = request.with_working_dir(cwd.clone());
        }
        if let Some(limit) = self.timeout {
            request = request.with_timeout(limit);
        }
        Ok(request)
    }
}

fn parse_desktop(value: &str) -> std::result::Result<VirtualDesktop, NorunError> {
    value.parse()
}

fn parse_dxvk(value: &str) -> std::result::Result<bool, NorunError> {
    parse_switch(value)
}

fn parse_sandbox(value: &str) -> std::result::Result<Sandbox, NorunError> {
    value.parse()
}

fn parse_profile(value: &str) -> std::result::Result<Profile, NorunError> {
    value.parse()
}

fn parse_timeout(value: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("{:?} is not a number of seconds", value))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("{:?} is not a valid timeout", value))
}

fn parse_env(value: &str) -> std::result::Result<(String, String), NorunError> {
    parse_env_pair(value)
}

/// Exit code for an error bubbled up to `main`.
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<NorunError>())
        .map(NorunError::exit_code)
        .unwrap_or(1)
}

/// Services built from one set of settings.
pub struct App {
    settings: Settings,
    lifecycle: PrefixLifecycle,
    session: RunSession,
    shortcuts: ShortcutExporter,
}

impl App {
    pub fn new(settings: Settings) -> Result<Self> {
        let runtime = Arc::new(
            WineRuntime::new(settings.wine_binary.clone(), settings.umu_run_binary.clone())
                .with_winetricks(settings.winetricks_binary.clone()),
        );
        Self::with_runtime(settings, runtime)
    }

    /// Build the services around a specific runtime implementation.
    pub fn with_runtime(settings: Settings, runtime: Arc<dyn CompatRuntime>) -> Result<Self> {
        let store = PrefixStore::new(&settings.data_dir)
            .with_context(|| format!("Failed to open prefix store at {}", settings.data_dir))?;
        let lifecycle =
            PrefixLifecycle::new(store.clone(), runtime.clone(), settings.bootstrap_timeout())
                .with_provision_timeout(settings.provision_timeout())
                .with_logs_dir(settings.logs_dir.clone());
        let session = RunSession::new(store.clone(), runtime, &settings);
        let shortcuts = ShortcutExporter::new(
            store,
            &settings.shortcuts_dir,
            settings.applications_dir.clone(),
        )
        .with_context(|| format!("Failed to open shortcuts at {}", settings.shortcuts_dir))?;

        Ok(Self {
            settings,
            lifecycle,
            session,
            shortcuts,
        })
    }

    /// Execute one command and return the process exit code.
    pub async fn run(&self, command: Commands) -> Result<i32> {
        match command {
            Commands::Create {
                id,
                runtime,
                profile,
            } => {
                let version = self.resolve_runtime(&runtime, None)?;
                let prefix = self.lifecycle.create_with_profile(&id, &version, profile)?;
                println!(
                    "Created {} ({}, {} profile) at {}",
                    prefix.id, prefix.runtime_version, prefix.profile, prefix.root
                );
            }

            Commands::List => {
                for prefix in self.lifecycle.store().list()? {
                    println!("{}", format_prefix(&prefix));
                }
            }

            Commands::Delete { id } => {
                self.lifecycle.destroy(&id)?;
                println!("Deleted {}", id);
            }

            Commands::Ensure {
                id,
                runtime,
                toggles,
                profile,
                repair,
            } => {
                let existing = match self.lifecycle.inspect(&id) {
                    Ok(prefix) => Some(prefix),
                    Err(NorunError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                let version = self.resolve_runtime(&runtime, existing.as_ref())?;
                let base = existing.map(|p| p.toggles).unwrap_or_default();
                let wanted = base.merged(&toggles.overrides()?);

                let prefix = self
                    .lifecycle
                    .ensure_ready_with(&id, &version, profile, &wanted, repair)
                    .await?;
                println!("{}", format_prefix(&prefix));
            }

            Commands::Status { id } => {
                let prefix = self.lifecycle.check_health(&id)?;
                println!("{}", format_prefix(&prefix));
            }

            Commands::Launch {
                id,
                executable,
                launch,
                args,
            } => {
                let request = launch.request(&id, executable, args)?;
                let result = self.session.launch(&request).await?;
                return Ok(report(&result));
            }

            Commands::Export {
                id,
                executable,
                name,
                icon,
                launch,
                args,
            } => {
                let request = launch.request(&id, executable, args)?;
                let shortcut = self.shortcuts.export(&id, &request, &name, icon)?;
                println!(
                    "Exported {} -> {} in {}",
                    shortcut.name,
                    shortcut.request.executable,
                    shortcut.prefix_id()
                );
            }

            Commands::Shortcut { command } => return self.run_shortcut(command).await,

            Commands::Doctor => {
                let extra = [
                    self.settings.wine_binary.as_str(),
                    self.settings.umu_run_binary.as_str(),
                    self.settings.winetricks_binary.as_str(),
                    self.settings.bwrap_binary.as_str(),
                ];
                let report = diagnose(&extra);
                for tool in &report {
                    match &tool.path {
                        Some(path) => println!("{:<12} {}", tool.name, path),
                        None => println!("{:<12} missing", tool.name),
                    }
                }
                if !report.iter().any(|t| t.found() && t.name == self.settings.wine_binary) {
                    return Ok(1);
                }
            }
        }
        Ok(0)
    }

    async fn run_shortcut(&self, command: ShortcutCommands) -> Result<i32> {
        match command {
            ShortcutCommands::List => {
                for shortcut in self.shortcuts.list()? {
                    println!(
                        "{:<24} {:<24} {}",
                        shortcut.name,
                        shortcut.prefix_id(),
                        shortcut.request.executable
                    );
                }
            }
            ShortcutCommands::Run { name } => {
                let shortcut = self.shortcuts.load(&name)?;
                let result = self.session.launch_shortcut(&shortcut).await?;
                return Ok(report(&result));
            }
            ShortcutCommands::Remove { name } => {
                self.shortcuts.remove(&name)?;
                println!("Removed shortcut {}", name);
            }
        }
        Ok(0)
    }

    /// `--runtime`, else the prefix's current version, else a guess from
    /// `--installer`, else the configured default.
    fn resolve_runtime(
        &self,
        args: &RuntimeArgs,
        existing: Option<&Prefix>,
    ) -> crate::Result<RuntimeVersion> {
        if let Some(version) = &args.runtime {
            return RuntimeVersion::new(version.clone());
        }
        if let Some(prefix) = existing {
            return Ok(prefix.runtime_version.clone());
        }
        let default = RuntimeVersion::new(self.settings.default_runtime.clone())?;
        Ok(match &args.installer {
            Some(installer) => choose_runtime(installer, &default),
            None => default,
        })
    }
}

fn format_prefix(prefix: &Prefix) -> String {
    let Toggles {
        virtual_desktop,
        dxvk,
        sandbox,
        ..
    } = &prefix.toggles;
    format!(
        "{:<24} {:<14} {:<20} {:<8} desktop={} dxvk={} sandbox={} {}",
        prefix.id,
        prefix.status,
        prefix.runtime_version,
        prefix.profile,
        virtual_desktop,
        if *dxvk { "on" } else { "off" },
        sandbox,
        prefix.created_at.format("%Y-%m-%d %H:%M")
    )
}

/// Print a run outcome and return the exit code for it.
fn report(result: &RunResult) -> i32 {
    match result.error() {
        Some(error) => eprintln!("{}", error),
        None => eprintln!(
            "{} (exit code {}) after {:.1}s",
            result.status,
            result
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            result.duration.as_secs_f32()
        ),
    }

    if !result.success() {
        if !result.stderr_tail.is_empty() {
            eprintln!("--- stderr (tail) ---\n{}", result.stderr_tail.trim_end());
        }
        for hint in result.hints() {
            eprintln!("hint: {}", hint);
        }
    }

    result.process_exit_code()
}
