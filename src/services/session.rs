//! Launching executables inside a prefix and supervising the child.
//!
//! The child runs in its own process group so a timeout can stop the whole
//! tree Wine spawns (wineserver, explorer, the target itself). Stdout passes
//! through; stderr is captured into a bounded tail buffer.
//!
//! Being outside the terminal's foreground group, the child gets a null
//! stdin and does not receive Ctrl-C from the terminal; console programs
//! that prompt for input see end-of-file.

use crate::error::{NorunError, Result};
use crate::models::{LaunchRequest, Prefix, RunResult, Settings, Shortcut, TerminalStatus};
use crate::services::lock::PrefixLock;
use crate::services::doctor::which;
use crate::services::runtime::{CompatRuntime, Invocation, toggle_environment};
use crate::services::sandbox::{self, HostPaths};
use crate::services::store::PrefixStore;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::timeout;

/// How long to wait for the stderr reader after the child has exited.
/// Grandchildren may keep the pipe open; their output is not waited for.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Keeps the last `budget` bytes written to it.
#[derive(Debug)]
pub struct TailBuffer {
    bytes: VecDeque<u8>,
    budget: usize,
    dropped: usize,
}

impl TailBuffer {
    pub fn new(budget: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(budget.min(8192)),
            budget,
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk);
        if self.bytes.len() > self.budget {
            let excess = self.bytes.len() - self.budget;
            self.bytes.drain(..excess);
            self.dropped += excess;
        }
    }

    /// Bytes discarded from the front so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn to_string_lossy(&self) -> String {
        let (front, back) = self.bytes.as_slices();
        let mut joined = Vec::with_capacity(front.len() + back.len());
        joined.extend_from_slice(front);
        joined.extend_from_slice(back);
        String::from_utf8_lossy(&joined).into_owned()
    }
}

/// Runs [`LaunchRequest`]s against prefixes from a [`PrefixStore`].
#[derive(Clone)]
pub struct RunSession {
    store: PrefixStore,
    runtime: Arc<dyn CompatRuntime>,
    cache_dir: Utf8PathBuf,
    logs_dir: Option<Utf8PathBuf>,
    grace_period: Duration,
    stderr_budget: usize,
    bwrap_binary: String,
}

impl RunSession {
    pub fn new(store: PrefixStore, runtime: Arc<dyn CompatRuntime>, settings: &Settings) -> Self {
        Self {
            store,
            runtime,
            cache_dir: settings.cache_dir.clone(),
            logs_dir: settings.session_log.then(|| settings.logs_dir.clone()),
            grace_period: settings.grace_period(),
            stderr_budget: settings.stderr_budget_bytes,
            bwrap_binary: settings.bwrap_binary.clone(),
        }
    }

    /// Launch `request` and wait for it, within the request's timeout plus
    /// the grace period.
    ///
    /// Timeouts and spawn failures are reported through
    /// [`RunResult::status`], not as errors.
    pub async fn launch(&self, request: &LaunchRequest) -> Result<RunResult> {
        crate::models::validate_identifier(&request.prefix_id)?;
        let _lock = PrefixLock::acquire_async(self.store.data_dir(), &request.prefix_id).await?;

        let prefix = self.store.get(&request.prefix_id)?;
        if !prefix.is_ready() {
            return Err(NorunError::PrefixNotReady {
                id: prefix.id,
                status: prefix.status.to_string(),
            });
        }

        let invocation = self.invocation(&prefix, request);
        let result = self.supervise(&invocation, request.timeout()).await;

        tracing::info!(
            "Run of {} in {} finished: {} (exit code {:?}) after {:.2}s",
            request.executable,
            prefix.id,
            result.status,
            result.exit_code,
            result.duration.as_secs_f32()
        );
        self.append_session_log(&prefix.id, request, &result);

        Ok(result)
    }

    /// Launch the request stored in a shortcut.
    ///
    /// A shortcut whose prefix has since been deleted yields
    /// `DanglingShortcut`.
    pub async fn launch_shortcut(&self, shortcut: &Shortcut) -> Result<RunResult> {
        let dangling = || NorunError::DanglingShortcut {
            shortcut: shortcut.name.clone(),
            prefix: shortcut.prefix_id().to_string(),
        };

        if !self.store.exists(shortcut.prefix_id()) {
            return Err(dangling());
        }

        match self.launch(&shortcut.request).await {
            Err(NorunError::NotFound(_)) => Err(dangling()),
            other => other,
        }
    }

    /// Resolve the full invocation; request overrides win over prefix toggles.
    fn invocation(&self, prefix: &Prefix, request: &LaunchRequest) -> Invocation {
        let effective = prefix.toggles.merged(&request.overrides);
        let environment =
            toggle_environment(&prefix.root, &self.cache_dir, &prefix.runtime_version, &effective);

        Invocation {
            executable: request.executable.clone(),
            args: request.args.clone(),
            prefix_root: prefix.root.clone(),
            runtime_version: prefix.runtime_version.clone(),
            environment,
            working_dir: request.working_dir.clone(),
            virtual_desktop: effective.virtual_desktop,
            sandbox: effective.sandbox,
        }
    }

    /// The runtime's launch command, wrapped in bwrap when the sandbox is on.
    fn command(&self, invocation: &Invocation) -> std::result::Result<Command, (String, String)> {
        let cmd = self.runtime.launch_command(invocation);
        if !invocation.sandbox.is_enabled() {
            return Ok(cmd);
        }
        if which(&self.bwrap_binary).is_none() {
            return Err((
                self.bwrap_binary.clone(),
                "sandbox requested but bubblewrap (bwrap) is not installed".to_string(),
            ));
        }

        let host = HostPaths::detect(&[self.store.data_dir(), self.cache_dir.as_path()]);
        Ok(sandbox::wrap(&cmd, &self.bwrap_binary, invocation.sandbox, &host))
    }

    async fn supervise(&self, invocation: &Invocation, limit: Option<Duration>) -> RunResult {
        let started = Instant::now();
        let launch_failed = |program: String, reason: String| {
            tracing::error!("Failed to spawn {}: {}", program, reason);
            RunResult {
                status: TerminalStatus::LaunchFailed,
                exit_code: None,
                duration: started.elapsed(),
                stderr_tail: String::new(),
                failure: Some(reason),
                program,
                timeout: limit,
            }
        };

        let mut cmd = match self.command(invocation) {
            Ok(cmd) => cmd,
            Err((program, reason)) => return launch_failed(program, reason),
        };
        let program = cmd.as_std().get_program().to_string_lossy().to_string();

        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return launch_failed(program, e.to_string()),
        };
        tracing::debug!("Spawned {} (pid {:?})", program, child.id());

        let tail = Arc::new(Mutex::new(TailBuffer::new(self.stderr_budget)));
        let reader = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(capture_stderr(stderr, tail.clone())));

        let (wait_result, timed_out) = match limit {
            None => (child.wait().await, false),
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(status) => (status, false),
                Err(_) => {
                    tracing::warn!("{} exceeded {:?}, terminating", program, limit);
                    (terminate(&mut child, self.grace_period).await, true)
                }
            },
        };

        if let Some(reader) = reader {
            if timeout(STDERR_DRAIN_TIMEOUT, reader).await.is_err() {
                tracing::debug!("stderr of {} still open, keeping what was read", program);
            }
        }

        let duration = started.elapsed();
        let stderr_tail = tail
            .lock()
            .map(|buffer| buffer.to_string_lossy())
            .unwrap_or_default();

        let (status, exit_code, failure) = match wait_result {
            Ok(exit) => {
                let (status, code) = classify(exit, timed_out);
                (status, code, None)
            }
            Err(e) => {
                tracing::error!("Failed to wait for {}: {}", program, e);
                let status = if timed_out {
                    TerminalStatus::TimedOut
                } else {
                    TerminalStatus::Crashed
                };
                (status, None, Some(e.to_string()))
            }
        };

        RunResult {
            status,
            exit_code,
            duration,
            stderr_tail,
            failure,
            program,
            timeout: limit,
        }
    }

    fn append_session_log(&self, prefix_id: &str, request: &LaunchRequest, result: &RunResult) {
        let Some(logs_dir) = &self.logs_dir else {
            return;
        };
        if let Err(e) = write_session_record(logs_dir, prefix_id, request, result) {
            tracing::warn!("Could not write session log for {}: {}", prefix_id, e);
        }
    }
}

async fn capture_stderr(mut stderr: ChildStderr, tail: Arc<Mutex<TailBuffer>>) {
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if let Ok(mut buffer) = tail.lock() {
                    buffer.push(&chunk[..n]);
                }
            }
            Err(e) => {
                tracing::debug!("stderr read failed: {}", e);
                break;
            }
        }
    }
}

/// SIGTERM the process group, then SIGKILL once `grace` runs out.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    signal_group(child, Signal::Term);

    match timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!("Child ignored SIGTERM for {:?}, killing", grace);
            signal_group(child, Signal::Kill);
            child.start_kill().ok();
            child.wait().await
        }
    }
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: Signal) {
    let Some(pid) = child.id() else {
        return;
    };
    let signal = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) with a negative pid signals the process group we created
    // at spawn time; it has no memory-safety preconditions.
    unsafe {
        libc::kill(-(pid as libc::pid_t), signal);
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: Signal) {
    child.start_kill().ok();
}

fn classify(exit: ExitStatus, timed_out: bool) -> (TerminalStatus, Option<i32>) {
    if timed_out {
        return (TerminalStatus::TimedOut, exit.code());
    }
    match exit.code() {
        Some(code) => (TerminalStatus::Completed, Some(code)),
        None => (TerminalStatus::Crashed, None),
    }
}

fn write_session_record(
    logs_dir: &Utf8Path,
    prefix_id: &str,
    request: &LaunchRequest,
    result: &RunResult,
) -> std::io::Result<()> {
    let dir = logs_dir.join(prefix_id);
    std::fs::create_dir_all(&dir)?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("run.log"))?;

    writeln!(
        file,
        "\n--- {} ---\n$ {} {}\nstatus: {}  exit code: {:?}  duration: {:.2}s",
        chrono::Local::now().to_rfc3339(),
        request.executable,
        request.args.join(" "),
        result.status,
        result.exit_code,
        result.duration.as_secs_f64()
    )?;
    if let Some(failure) = &result.failure {
        writeln!(file, "failure: {}", failure)?;
    }
    if !result.stderr_tail.is_empty() {
        writeln!(file, "{}", result.stderr_tail.trim_end())?;
    }
    Ok(())
}
