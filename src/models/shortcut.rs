use crate::models::LaunchRequest;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// A persisted, replayable launch configuration.
///
/// The template carries only what the user asked for explicitly: no
/// timestamps and no copy of the prefix's current toggle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortcut {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Utf8PathBuf>,

    pub request: LaunchRequest,
}

impl Shortcut {
    pub fn prefix_id(&self) -> &str {
        &self.request.prefix_id
    }
}
