use crate::error::{NorunError, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Smallest virtual desktop Wine renders usefully.
pub const MIN_DESKTOP_WIDTH: u32 = 320;
pub const MIN_DESKTOP_HEIGHT: u32 = 200;

static DESKTOP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,5})x(\d{1,5})$").expect("Invalid desktop regex"));

static ENV_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid env name regex"));

/// Virtual desktop mode: either disabled or a fixed geometry.
///
/// Serialized as `off` or `WxH` so the sidecar stays human-editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VirtualDesktop {
    #[default]
    Off,
    Size { width: u32, height: u32 },
}

impl VirtualDesktop {
    pub fn is_enabled(&self) -> bool {
        matches!(self, VirtualDesktop::Size { .. })
    }

    /// The `explorer` argument that opens the desktop, e.g. `/desktop=norun,1024x768`.
    pub fn explorer_arg(&self) -> Option<String> {
        match self {
            VirtualDesktop::Off => None,
            VirtualDesktop::Size { width, height } => {
                Some(format!("/desktop=norun,{}x{}", width, height))
            }
        }
    }
}

impl FromStr for VirtualDesktop {
    type Err = NorunError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("off") {
            return Ok(VirtualDesktop::Off);
        }

        let caps = DESKTOP_PATTERN.captures(s).ok_or_else(|| {
            NorunError::InvalidToggle(format!("virtual desktop {:?}: use WxH (e.g. 1024x768) or off", s))
        })?;

        // Both groups are at most five digits, always within u32.
        let width: u32 = caps[1].parse().unwrap_or(0);
        let height: u32 = caps[2].parse().unwrap_or(0);

        if width < MIN_DESKTOP_WIDTH || height < MIN_DESKTOP_HEIGHT {
            return Err(NorunError::InvalidToggle(format!(
                "virtual desktop {}x{} is smaller than {}x{}",
                width, height, MIN_DESKTOP_WIDTH, MIN_DESKTOP_HEIGHT
            )));
        }

        Ok(VirtualDesktop::Size { width, height })
    }
}

impl fmt::Display for VirtualDesktop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualDesktop::Off => write!(f, "off"),
            VirtualDesktop::Size { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

impl TryFrom<String> for VirtualDesktop {
    type Error = NorunError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VirtualDesktop> for String {
    fn from(value: VirtualDesktop) -> Self {
        value.to_string()
    }
}

/// Bubblewrap isolation for launched programs.
///
/// `full` shares the home directory; `strict` only exposes the NORUN data
/// and cache directories plus `~/Downloads`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sandbox {
    #[default]
    Off,
    Full,
    Strict,
}

impl Sandbox {
    pub fn is_enabled(&self) -> bool {
        *self != Sandbox::Off
    }
}

impl FromStr for Sandbox {
    type Err = NorunError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Sandbox::Off),
            "full" => Ok(Sandbox::Full),
            "strict" => Ok(Sandbox::Strict),
            other => Err(NorunError::InvalidToggle(format!(
                "sandbox {:?}: expected off, full or strict",
                other
            ))),
        }
    }
}

impl fmt::Display for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sandbox::Off => "off",
            Sandbox::Full => "full",
            Sandbox::Strict => "strict",
        };
        f.write_str(s)
    }
}

/// Runtime options applied to a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggles {
    #[serde(default)]
    pub virtual_desktop: VirtualDesktop,

    #[serde(default = "default_dxvk")]
    pub dxvk: bool,

    #[serde(default)]
    pub sandbox: Sandbox,

    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            virtual_desktop: VirtualDesktop::Off,
            dxvk: default_dxvk(),
            sandbox: Sandbox::Off,
            env: IndexMap::new(),
        }
    }
}

fn default_dxvk() -> bool {
    true
}

impl Toggles {
    /// Build a validated toggle set.
    pub fn new(
        virtual_desktop: VirtualDesktop,
        dxvk: bool,
        env: IndexMap<String, String>,
    ) -> Result<Self> {
        validate_env(&env)?;
        Ok(Self {
            virtual_desktop,
            dxvk,
            sandbox: Sandbox::Off,
            env,
        })
    }

    pub fn with_sandbox(mut self, sandbox: Sandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Apply overrides on top of these toggles; overrides win on conflict.
    pub fn merged(&self, overrides: &ToggleOverrides) -> Toggles {
        let mut env = self.env.clone();
        for (key, value) in &overrides.env {
            env.insert(key.clone(), value.clone());
        }

        Toggles {
            virtual_desktop: overrides.virtual_desktop.unwrap_or(self.virtual_desktop),
            dxvk: overrides.dxvk.unwrap_or(self.dxvk),
            sandbox: overrides.sandbox.unwrap_or(self.sandbox),
            env,
        }
    }

    /// True when persisting `other` would change registry-backed state.
    pub fn registry_differs(&self, other: &Toggles) -> bool {
        self.virtual_desktop != other.virtual_desktop
    }

    /// True when moving to `other` switches DXVK from off to on.
    pub fn enables_dxvk(&self, other: &Toggles) -> bool {
        !self.dxvk && other.dxvk
    }
}

/// Per-launch overrides. Unset fields fall back to the prefix's toggles.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToggleOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_desktop: Option<VirtualDesktop>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dxvk: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<Sandbox>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
}

impl ToggleOverrides {
    pub fn new(
        virtual_desktop: Option<VirtualDesktop>,
        dxvk: Option<bool>,
        env: IndexMap<String, String>,
    ) -> Result<Self> {
        validate_env(&env)?;
        Ok(Self {
            virtual_desktop,
            dxvk,
            sandbox: None,
            env,
        })
    }

    pub fn with_sandbox(mut self, sandbox: Option<Sandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.virtual_desktop.is_none()
            && self.dxvk.is_none()
            && self.sandbox.is_none()
            && self.env.is_empty()
    }
}

/// Parse a `KEY=VALUE` pair as given on the command line.
pub fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| NorunError::InvalidToggle(format!("env {:?}: expected KEY=VALUE", pair)))?;
    validate_env_name(key)?;
    Ok((key.to_string(), value.to_string()))
}

/// Parse `on`/`off` (and the usual boolean spellings) for the DXVK toggle.
pub fn parse_switch(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(NorunError::InvalidToggle(format!(
            "{:?}: expected on or off",
            other
        ))),
    }
}

fn validate_env(env: &IndexMap<String, String>) -> Result<()> {
    env.keys().try_for_each(|key| validate_env_name(key))
}

/// Variables NORUN derives from the prefix itself; user env may not set them.
pub const RESERVED_ENV: [&str; 1] = ["WINEPREFIX"];

fn validate_env_name(key: &str) -> Result<()> {
    if !ENV_NAME_PATTERN.is_match(key) {
        return Err(NorunError::InvalidToggle(format!(
            "environment variable name {:?}",
            key
        )));
    }
    if RESERVED_ENV.contains(&key) {
        return Err(NorunError::InvalidToggle(format!(
            "{} is set by norun from the prefix and cannot be overridden",
            key
        )));
    }
    Ok(())
}
