//! The compatibility runtime seam.
//!
//! The core never talks to Wine or Proton directly. It asks a
//! [`CompatRuntime`] for ready-to-spawn commands and supervises the children
//! itself; [`WineRuntime`] is the production implementation.

use crate::models::{RuntimeKind, RuntimeVersion, Sandbox, Toggles, VirtualDesktop};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tokio::process::Command;

const DXVK_DLLS: &str = "d3d9,d3d10core,d3d11,dxgi";
const EXPLORER_KEY: &str = r"HKCU\Software\Wine\Explorer";
const DESKTOPS_KEY: &str = r"HKCU\Software\Wine\Explorer\Desktops";

/// Everything needed to run one executable inside a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub executable: Utf8PathBuf,
    pub args: Vec<String>,
    pub prefix_root: Utf8PathBuf,
    pub runtime_version: RuntimeVersion,
    pub environment: IndexMap<String, String>,
    pub working_dir: Option<Utf8PathBuf>,
    pub virtual_desktop: VirtualDesktop,
    pub sandbox: Sandbox,
}

/// Builds the commands that touch a prefix.
///
/// Implementations only construct commands; spawning, timeouts and output
/// capture belong to the caller.
#[cfg_attr(test, mockall::automock)]
pub trait CompatRuntime: Send + Sync {
    /// Command that runs the target executable.
    fn launch_command(&self, invocation: &Invocation) -> Command;

    /// First-run (or update) initialization of the prefix structures.
    fn bootstrap_command(&self, prefix_root: &Utf8Path, version: &RuntimeVersion) -> Command;

    /// Commands that persist registry-backed toggles into the prefix.
    fn toggle_commands(
        &self,
        prefix_root: &Utf8Path,
        version: &RuntimeVersion,
        toggles: &Toggles,
    ) -> Vec<Command>;

    /// Unattended winetricks run installing `verbs` into the prefix.
    fn winetricks_command(
        &self,
        prefix_root: &Utf8Path,
        version: &RuntimeVersion,
        verbs: &[String],
    ) -> Command;
}

/// Environment derived from a toggle set.
///
/// `WINEDEBUG` is only defaulted; a value in `toggles.env` replaces it.
/// `WINEPREFIX` always points at `prefix_root`, whatever `toggles.env` says.
pub fn toggle_environment(
    prefix_root: &Utf8Path,
    cache_dir: &Utf8Path,
    version: &RuntimeVersion,
    toggles: &Toggles,
) -> IndexMap<String, String> {
    let mut env = IndexMap::new();
    env.insert("WINEPREFIX".to_string(), prefix_root.to_string());
    env.insert("WINEDEBUG".to_string(), "-all".to_string());
    env.insert(
        "DXVK_STATE_CACHE_PATH".to_string(),
        cache_dir.join("dxvk").to_string(),
    );
    env.insert(
        "VKD3D_SHADER_CACHE_PATH".to_string(),
        cache_dir.join("vkd3d").to_string(),
    );

    if toggles.dxvk {
        env.insert("WINEDLLOVERRIDES".to_string(), format!("{}=n,b", DXVK_DLLS));
    } else {
        env.insert("WINEDLLOVERRIDES".to_string(), format!("{}=b", DXVK_DLLS));
        env.insert("PROTON_USE_WINED3D".to_string(), "1".to_string());
    }

    if version.kind() == RuntimeKind::Proton {
        env.insert("PROTONPATH".to_string(), version.to_string());
        env.insert("GAMEID".to_string(), "umu-default".to_string());
    }

    for (key, value) in &toggles.env {
        env.insert(key.clone(), value.clone());
    }
    env.insert("WINEPREFIX".to_string(), prefix_root.to_string());
    env
}

/// Runs Wine prefixes through `wine`, or Proton ones through `umu-run`.
#[derive(Debug, Clone)]
pub struct WineRuntime {
    wine_binary: String,
    umu_run_binary: String,
    winetricks_binary: String,
}

impl WineRuntime {
    pub fn new(wine_binary: impl Into<String>, umu_run_binary: impl Into<String>) -> Self {
        Self {
            wine_binary: wine_binary.into(),
            umu_run_binary: umu_run_binary.into(),
            winetricks_binary: "winetricks".to_string(),
        }
    }

    pub fn with_winetricks(mut self, winetricks_binary: impl Into<String>) -> Self {
        self.winetricks_binary = winetricks_binary.into();
        self
    }

    fn program(&self, version: &RuntimeVersion) -> &str {
        match version.kind() {
            RuntimeKind::Wine => &self.wine_binary,
            RuntimeKind::Proton => &self.umu_run_binary,
        }
    }

    /// A command in the prefix with the base environment applied.
    fn base_command(&self, prefix_root: &Utf8Path, version: &RuntimeVersion) -> Command {
        let mut cmd = Command::new(self.program(version));
        cmd.env("WINEPREFIX", prefix_root.as_str());
        cmd.env("WINEDEBUG", "-all");
        if version.kind() == RuntimeKind::Proton {
            cmd.env("PROTONPATH", version.as_str());
            cmd.env("GAMEID", "umu-default");
        }
        cmd
    }

    fn reg_command(
        &self,
        prefix_root: &Utf8Path,
        version: &RuntimeVersion,
        args: &[&str],
    ) -> Command {
        let mut cmd = self.base_command(prefix_root, version);
        cmd.arg("reg").args(args);
        cmd
    }
}

impl CompatRuntime for WineRuntime {
    fn launch_command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(self.program(&invocation.runtime_version));

        if let Some(desktop) = invocation.virtual_desktop.explorer_arg() {
            cmd.arg("explorer").arg(desktop);
        }
        cmd.arg(invocation.executable.as_str());
        cmd.args(&invocation.args);

        cmd.envs(&invocation.environment);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn bootstrap_command(&self, prefix_root: &Utf8Path, version: &RuntimeVersion) -> Command {
        let mut cmd = self.base_command(prefix_root, version);
        cmd.args(["wineboot", "-u"]);
        cmd
    }

    fn toggle_commands(
        &self,
        prefix_root: &Utf8Path,
        version: &RuntimeVersion,
        toggles: &Toggles,
    ) -> Vec<Command> {
        match toggles.virtual_desktop {
            VirtualDesktop::Off => vec![self.reg_command(
                prefix_root,
                version,
                &["delete", EXPLORER_KEY, "/v", "Desktop", "/f"],
            )],
            VirtualDesktop::Size { .. } => {
                let geometry = toggles.virtual_desktop.to_string();
                vec![
                    self.reg_command(
                        prefix_root,
                        version,
                        &["add", EXPLORER_KEY, "/v", "Desktop", "/d", "Default", "/f"],
                    ),
                    self.reg_command(
                        prefix_root,
                        version,
                        &["add", DESKTOPS_KEY, "/v", "Default", "/d", &geometry, "/f"],
                    ),
                ]
            }
        }
    }

    fn winetricks_command(
        &self,
        prefix_root: &Utf8Path,
        version: &RuntimeVersion,
        verbs: &[String],
    ) -> Command {
        match version.kind() {
            // umu-run ships its own winetricks matched to the Proton build.
            RuntimeKind::Proton => {
                let mut cmd = self.base_command(prefix_root, version);
                cmd.args(["winetricks", "-q"]).args(verbs);
                cmd
            }
            RuntimeKind::Wine => {
                let mut cmd = Command::new(&self.winetricks_binary);
                cmd.env("WINEPREFIX", prefix_root.as_str())
                    .env("WINEDEBUG", "-all")
                    .env("WINE", &self.wine_binary)
                    .arg("-q")
                    .args(verbs);
                cmd
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    fn invocation(version: &str, desktop: VirtualDesktop) -> Invocation {
        Invocation {
            executable: Utf8PathBuf::from("/games/setup.exe"),
            args: vec!["/S".to_string()],
            prefix_root: Utf8PathBuf::from("/data/prefixes/app"),
            runtime_version: RuntimeVersion::new(version).unwrap(),
            environment: IndexMap::new(),
            working_dir: None,
            virtual_desktop: desktop,
            sandbox: Sandbox::Off,
        }
    }

    #[test]
    fn test_toggle_environment_dxvk_on() {
        let version = RuntimeVersion::new("wine-9.0").unwrap();
        let env = toggle_environment(
            Utf8Path::new("/p"),
            Utf8Path::new("/cache"),
            &version,
            &Toggles::default(),
        );
        assert_eq!(env["WINEPREFIX"], "/p");
        assert_eq!(env["WINEDLLOVERRIDES"], "d3d9,d3d10core,d3d11,dxgi=n,b");
        assert_eq!(env["DXVK_STATE_CACHE_PATH"], "/cache/dxvk");
        assert!(!env.contains_key("PROTON_USE_WINED3D"));
        assert!(!env.contains_key("PROTONPATH"));
    }

    #[test]
    fn test_toggle_environment_dxvk_off_and_user_env() {
        let version = RuntimeVersion::new("GE-Proton9-20").unwrap();
        let mut toggles = Toggles::default();
        toggles.dxvk = false;
        toggles.env.insert("WINEDEBUG".to_string(), "+seh".to_string());

        let env = toggle_environment(Utf8Path::new("/p"), Utf8Path::new("/c"), &version, &toggles);
        assert_eq!(env["PROTON_USE_WINED3D"], "1");
        assert_eq!(env["WINEDLLOVERRIDES"], "d3d9,d3d10core,d3d11,dxgi=b");
        assert_eq!(env["PROTONPATH"], "GE-Proton9-20");
        assert_eq!(env["WINEDEBUG"], "+seh");
    }

    #[test]
    fn test_toggle_environment_pins_wineprefix() {
        let version = RuntimeVersion::new("wine-9.0").unwrap();
        let mut toggles = Toggles::default();
        toggles
            .env
            .insert("WINEPREFIX".to_string(), "/tmp/other".to_string());

        let env = toggle_environment(Utf8Path::new("/p"), Utf8Path::new("/c"), &version, &toggles);
        assert_eq!(env["WINEPREFIX"], "/p");
    }

    #[test]
    fn test_launch_command_plain() {
        let runtime = WineRuntime::new("wine", "umu-run");
        let cmd = runtime.launch_command(&invocation("wine-9.0", VirtualDesktop::Off));
        assert_eq!(cmd.as_std().get_program(), "wine");
        assert_eq!(args_of(&cmd), vec!["/games/setup.exe", "/S"]);
    }

    #[test]
    fn test_launch_command_with_desktop_uses_explorer() {
        let runtime = WineRuntime::new("wine", "umu-run");
        let desktop: VirtualDesktop = "1024x768".parse().unwrap();
        let cmd = runtime.launch_command(&invocation("GE-Proton9-20", desktop));
        assert_eq!(cmd.as_std().get_program(), "umu-run");
        assert_eq!(
            args_of(&cmd),
            vec!["explorer", "/desktop=norun,1024x768", "/games/setup.exe", "/S"]
        );
    }

    #[test]
    fn test_bootstrap_command_runs_wineboot() {
        let runtime = WineRuntime::new("/usr/bin/wine", "umu-run");
        let version = RuntimeVersion::new("wine-9.0").unwrap();
        let cmd = runtime.bootstrap_command(Utf8Path::new("/p"), &version);
        assert_eq!(cmd.as_std().get_program(), "/usr/bin/wine");
        assert_eq!(args_of(&cmd), vec!["wineboot", "-u"]);
    }

    #[test]
    fn test_toggle_commands_write_desktop_registry() {
        let runtime = WineRuntime::new("wine", "umu-run");
        let version = RuntimeVersion::new("wine-9.0").unwrap();
        let mut toggles = Toggles::default();
        toggles.virtual_desktop = "800x600".parse().unwrap();

        let cmds = runtime.toggle_commands(Utf8Path::new("/p"), &version, &toggles);
        assert_eq!(cmds.len(), 2);
        assert!(args_of(&cmds[1]).contains(&"800x600".to_string()));

        let off = runtime.toggle_commands(Utf8Path::new("/p"), &version, &Toggles::default());
        assert_eq!(off.len(), 1);
        assert_eq!(args_of(&off[0])[1], "delete");
    }

    #[test]
    fn test_winetricks_command_per_runtime_kind() {
        let runtime = WineRuntime::new("/opt/wine/bin/wine", "umu-run").with_winetricks("/usr/bin/winetricks");
        let verbs = vec!["corefonts".to_string(), "vcrun2019".to_string()];

        let wine = runtime.winetricks_command(
            Utf8Path::new("/p"),
            &RuntimeVersion::new("wine-9.0").unwrap(),
            &verbs,
        );
        assert_eq!(wine.as_std().get_program(), "/usr/bin/winetricks");
        assert_eq!(args_of(&wine), vec!["-q", "corefonts", "vcrun2019"]);
        let envs: Vec<_> = wine.as_std().get_envs().collect();
        assert!(envs.contains(&(
            std::ffi::OsStr::new("WINE"),
            Some(std::ffi::OsStr::new("/opt/wine/bin/wine"))
        )));

        let proton = runtime.winetricks_command(
            Utf8Path::new("/p"),
            &RuntimeVersion::new("GE-Proton9-20").unwrap(),
            &verbs,
        );
        assert_eq!(proton.as_std().get_program(), "umu-run");
        assert_eq!(args_of(&proton), vec!["winetricks", "-q", "corefonts", "vcrun2019"]);
    }
}
