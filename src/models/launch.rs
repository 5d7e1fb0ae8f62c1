use crate::error::NorunError;
use crate::models::ToggleOverrides;
use camino::Utf8PathBuf;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

/// One launch of an executable inside a prefix. Built per invocation and
/// never persisted, except as a shortcut template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub executable: Utf8PathBuf,
    pub prefix_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "ToggleOverrides::is_empty")]
    pub overrides: ToggleOverrides,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<Utf8PathBuf>,

    /// Milliseconds before the child is asked to stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl LaunchRequest {
    pub fn new(executable: impl Into<Utf8PathBuf>, prefix_id: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            prefix_id: prefix_id.into(),
            args: Vec::new(),
            overrides: ToggleOverrides::default(),
            working_dir: None,
            timeout_ms: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_overrides(mut self, overrides: ToggleOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        // Sub-millisecond remainders round up so a nonzero timeout never becomes zero.
        let nanos = timeout.as_nanos();
        let millis = nanos.div_ceil(1_000_000);
        self.timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// How a launch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalStatus {
    /// The child exited on its own, with any exit code.
    Completed,
    /// The child was killed by a signal we did not send.
    Crashed,
    /// The timeout expired and the child was terminated.
    TimedOut,
    /// The compatibility runtime could not be spawned.
    LaunchFailed,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalStatus::Completed => "completed",
            TerminalStatus::Crashed => "crashed",
            TerminalStatus::TimedOut => "timed-out",
            TerminalStatus::LaunchFailed => "launch-failed",
        };
        f.write_str(s)
    }
}

/// Outcome of [`RunSession::launch`](crate::services::RunSession::launch).
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: TerminalStatus,
    /// `None` when the child never ran or was killed by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// Last bytes of stderr, oldest output dropped first.
    pub stderr_tail: String,
    /// Set for `LaunchFailed`; the spawn error.
    pub failure: Option<String>,
    /// Program that was spawned (the compatibility runtime binary).
    pub program: String,
    /// Timeout that was in force, if any.
    pub timeout: Option<Duration>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.status == TerminalStatus::Completed && self.exit_code == Some(0)
    }

    /// Convert the non-completed outcomes into the matching error kind.
    pub fn error(&self) -> Option<NorunError> {
        match self.status {
            TerminalStatus::Completed | TerminalStatus::Crashed => None,
            TerminalStatus::TimedOut => Some(NorunError::Timeout(self.timeout.unwrap_or_default())),
            TerminalStatus::LaunchFailed => Some(NorunError::LaunchFailed {
                program: self.program.clone(),
                reason: self.failure.clone().unwrap_or_default(),
            }),
        }
    }

    /// Exit code a CLI should report for this run.
    pub fn process_exit_code(&self) -> i32 {
        match self.status {
            TerminalStatus::Completed => self.exit_code.map(|c| c & 0xff).unwrap_or(1),
            TerminalStatus::Crashed => 12,
            TerminalStatus::TimedOut => 11,
            TerminalStatus::LaunchFailed => 10,
        }
    }

    /// Advice derived from well-known failure patterns in the stderr tail.
    pub fn hints(&self) -> Vec<&'static str> {
        let mut hints: Vec<&'static str> = FAILURE_HINTS
            .iter()
            .filter(|(pattern, _)| pattern.is_match(&self.stderr_tail))
            .map(|(_, hint)| *hint)
            .collect();
        hints.sort_unstable();
        hints.dedup();
        hints
    }
}

static FAILURE_HINTS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)mscoree|dotnet", ".NET runtime missing: install dotnet48 into the prefix"),
        (r"(?i)vcrun|msvcp|vcruntime", "Visual C++ runtime missing: install vcrun2019"),
        (r"(?i)d3d|dxgi|vulkan", "Graphics failure: try toggling DXVK or a Proton runtime"),
        (
            r"(?i)anti.?cheat|battleye",
            "Anti-cheat detected: this title usually needs native Windows",
        ),
    ]
    .into_iter()
    .map(|(pattern, hint)| (Regex::new(pattern).expect("Invalid hint regex"), hint))
    .collect()
});
