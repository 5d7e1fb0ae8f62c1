use crate::error::{NorunError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Graphics translation layers installed when DXVK is on.
pub const GRAPHICS_VERBS: [&str; 2] = ["dxvk", "vkd3d"];

/// Provisioning recipe applied after `wineboot` when a prefix is bootstrapped.
///
/// Each profile maps to winetricks verbs: a Windows version, then runtime
/// dependencies. `bare` skips both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    General,
    Dotnet,
    Games,
    Bare,
}

impl Profile {
    pub fn all() -> &'static [Profile] {
        &[Profile::General, Profile::Dotnet, Profile::Games, Profile::Bare]
    }

    /// Windows version reported to programs.
    pub fn winver(&self) -> Option<&'static str> {
        match self {
            Profile::Bare => None,
            _ => Some("win10"),
        }
    }

    /// Runtime dependencies installed in one winetricks run.
    pub fn dependencies(&self) -> &'static [&'static str] {
        match self {
            Profile::General => &["corefonts", "vcrun2019"],
            Profile::Dotnet => &["corefonts", "vcrun2019", "dotnet48"],
            Profile::Games => &["corefonts"],
            Profile::Bare => &[],
        }
    }

    /// Winetricks invocations for a bootstrap, in order. Graphics layers are
    /// only included when `dxvk` is on.
    pub fn provision_steps(&self, dxvk: bool) -> Vec<Vec<String>> {
        let mut steps = Vec::new();
        if let Some(winver) = self.winver() {
            steps.push(vec![winver.to_string()]);
        }
        if !self.dependencies().is_empty() {
            steps.push(self.dependencies().iter().map(|v| v.to_string()).collect());
        }
        if dxvk {
            steps.push(graphics_verbs());
        }
        steps
    }
}

pub fn graphics_verbs() -> Vec<String> {
    GRAPHICS_VERBS.iter().map(|v| v.to_string()).collect()
}

impl FromStr for Profile {
    type Err = NorunError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Profile::General),
            "dotnet" => Ok(Profile::Dotnet),
            "games" => Ok(Profile::Games),
            "bare" => Ok(Profile::Bare),
            other => Err(NorunError::InvalidToggle(format!(
                "profile {:?}: choose from general, dotnet, games, bare",
                other
            ))),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Profile::General => "general",
            Profile::Dotnet => "dotnet",
            Profile::Games => "games",
            Profile::Bare => "bare",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotnet_steps() {
        let steps = Profile::Dotnet.provision_steps(true);
        assert_eq!(
            steps,
            vec![
                vec!["win10".to_string()],
                vec![
                    "corefonts".to_string(),
                    "vcrun2019".to_string(),
                    "dotnet48".to_string()
                ],
                vec!["dxvk".to_string(), "vkd3d".to_string()],
            ]
        );
    }

    #[test]
    fn test_graphics_skipped_without_dxvk() {
        let steps = Profile::Games.provision_steps(false);
        assert_eq!(steps.len(), 2);
        assert!(!steps.concat().contains(&"dxvk".to_string()));
    }

    #[test]
    fn test_bare_only_installs_graphics() {
        assert!(Profile::Bare.provision_steps(false).is_empty());
        assert_eq!(Profile::Bare.provision_steps(true), vec![graphics_verbs()]);
    }

    #[test]
    fn test_parse_and_display() {
        for profile in Profile::all() {
            assert_eq!(profile.to_string().parse::<Profile>().unwrap(), *profile);
        }
        assert!("office".parse::<Profile>().is_err());
    }
}
