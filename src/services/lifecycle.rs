//! Prefix lifecycle: create, bootstrap, provision, apply toggles, repair,
//! destroy.

use crate::error::{NorunError, Result};
use crate::models::{Prefix, PrefixStatus, Profile, RuntimeVersion, Toggles, graphics_verbs};
use crate::services::lock::PrefixLock;
use crate::services::runtime::CompatRuntime;
use crate::services::store::PrefixStore;
use camino::Utf8PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Attempts made by a repair before giving up: the first try plus one retry.
pub const MAX_REPAIR_ATTEMPTS: usize = 2;

/// What `ensure_ready` should leave behind.
#[derive(Debug, Clone, Copy)]
struct Desired<'a> {
    version: &'a RuntimeVersion,
    profile: Profile,
    toggles: &'a Toggles,
}

/// Operations on a single prefix, composed from [`PrefixStore`] and a
/// [`CompatRuntime`].
///
/// `ensure_ready` holds the prefix's advisory lock for its whole duration.
#[derive(Clone)]
pub struct PrefixLifecycle {
    store: PrefixStore,
    runtime: Arc<dyn CompatRuntime>,
    step_timeout: Duration,
    provision_timeout: Duration,
    logs_dir: Option<Utf8PathBuf>,
}

impl PrefixLifecycle {
    pub fn new(store: PrefixStore, runtime: Arc<dyn CompatRuntime>, step_timeout: Duration) -> Self {
        Self {
            store,
            runtime,
            step_timeout,
            provision_timeout: step_timeout,
            logs_dir: None,
        }
    }

    /// Limit for each winetricks run; installers like dotnet48 outlast wineboot.
    pub fn with_provision_timeout(mut self, limit: Duration) -> Self {
        self.provision_timeout = limit;
        self
    }

    /// Directory holding per-prefix session logs, removed along with a prefix.
    pub fn with_logs_dir(mut self, logs_dir: impl Into<Utf8PathBuf>) -> Self {
        self.logs_dir = Some(logs_dir.into());
        self
    }

    pub fn store(&self) -> &PrefixStore {
        &self.store
    }

    /// Register a prefix without bootstrapping it.
    pub fn create(&self, id: &str, runtime_version: &RuntimeVersion) -> Result<Prefix> {
        self.store.create(id, runtime_version)
    }

    pub fn create_with_profile(
        &self,
        id: &str,
        runtime_version: &RuntimeVersion,
        profile: Profile,
    ) -> Result<Prefix> {
        self.store.create_with_profile(id, runtime_version, profile)
    }

    pub fn inspect(&self, id: &str) -> Result<Prefix> {
        self.store.get(id)
    }

    /// Delete the prefix, its filesystem root and its session logs.
    pub fn destroy(&self, id: &str) -> Result<()> {
        self.store.delete(id)?;

        if let Some(logs_dir) = &self.logs_dir {
            let dir = logs_dir.join(id);
            if dir.exists() {
                match std::fs::remove_dir_all(&dir) {
                    Ok(()) => tracing::debug!("Removed logs of {} at {}", id, dir),
                    Err(e) => tracing::warn!("Could not remove logs at {}: {}", dir, e),
                }
            }
        }
        Ok(())
    }

    /// Make sure the prefix exists, is bootstrapped and carries `toggles`.
    /// A missing prefix is created with the default profile.
    pub async fn ensure_ready(
        &self,
        id: &str,
        runtime_version: &RuntimeVersion,
        toggles: &Toggles,
        repair: bool,
    ) -> Result<Prefix> {
        self.ensure_ready_with(id, runtime_version, None, toggles, repair)
            .await
    }

    /// Make sure the prefix exists, is bootstrapped and provisioned with
    /// `profile` (or its recorded one), and carries `toggles`.
    ///
    /// - missing: create, bootstrap, provision, apply toggles
    /// - `uninitialized`: bootstrap, provision, apply toggles
    /// - `ready`: apply toggle deltas; a runtime or profile change
    ///   re-bootstraps first
    /// - `broken`: `PrefixBroken`, unless `repair` is set, in which case
    ///   bootstrap is retried at most once before `RepairFailed`
    pub async fn ensure_ready_with(
        &self,
        id: &str,
        runtime_version: &RuntimeVersion,
        profile: Option<Profile>,
        toggles: &Toggles,
        repair: bool,
    ) -> Result<Prefix> {
        crate::models::validate_identifier(id)?;
        let _lock = PrefixLock::acquire_async(self.store.data_dir(), id).await?;

        let prefix = match self.store.get(id) {
            Ok(prefix) => prefix,
            Err(NorunError::NotFound(_)) => {
                self.store
                    .create_async(id, runtime_version, profile.unwrap_or_default())
                    .await?
            }
            Err(e) => return Err(e),
        };

        let desired = Desired {
            version: runtime_version,
            profile: profile.unwrap_or(prefix.profile),
            toggles,
        };

        match prefix.status {
            PrefixStatus::Broken if !repair => Err(NorunError::PrefixBroken(id.to_string())),
            PrefixStatus::Broken => self.repair(prefix, desired).await,
            PrefixStatus::Uninitialized => self.initialize(prefix, desired).await,
            PrefixStatus::Ready
                if prefix.runtime_version != *runtime_version
                    || prefix.profile != desired.profile =>
            {
                tracing::info!(
                    "Prefix {} moves from {}/{} to {}/{}, updating",
                    id,
                    prefix.runtime_version,
                    prefix.profile,
                    runtime_version,
                    desired.profile
                );
                self.initialize(prefix, desired).await
            }
            PrefixStatus::Ready => self.apply_toggles(prefix, toggles).await,
        }
    }

    /// Mark a ready prefix broken when its runtime structures are gone.
    pub fn check_health(&self, id: &str) -> Result<Prefix> {
        let _lock = PrefixLock::acquire(self.store.data_dir(), id)?;
        let mut prefix = self.store.get(id)?;

        if prefix.status == PrefixStatus::Ready && !prefix.drive_c().is_dir() {
            tracing::warn!("Prefix {} has no drive_c, marking broken", id);
            prefix.status = PrefixStatus::Broken;
            self.store.update(&prefix)?;
        }
        Ok(prefix)
    }

    /// One bootstrap attempt. Failure leaves the prefix `broken`.
    async fn initialize(&self, mut prefix: Prefix, desired: Desired<'_>) -> Result<Prefix> {
        match self.bootstrap(&prefix, desired).await {
            Ok(()) => self.mark_ready(prefix, desired),
            Err(reason) => {
                tracing::warn!("Bootstrap of prefix {} failed: {}", prefix.id, reason);
                prefix.status = PrefixStatus::Broken;
                self.store.update(&prefix)?;
                Err(NorunError::BootstrapFailed {
                    id: prefix.id,
                    reason,
                })
            }
        }
    }

    async fn repair(&self, prefix: Prefix, desired: Desired<'_>) -> Result<Prefix> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_REPAIR_ATTEMPTS {
            tracing::info!(
                "Repairing prefix {} (attempt {}/{})",
                prefix.id,
                attempt,
                MAX_REPAIR_ATTEMPTS
            );
            match self.bootstrap(&prefix, desired).await {
                Ok(()) => return self.mark_ready(prefix, desired),
                Err(reason) => {
                    tracing::warn!("Repair attempt {} for {} failed: {}", attempt, prefix.id, reason);
                    last_error = reason;
                }
            }
        }

        tracing::error!("Giving up on repair of prefix {}", prefix.id);
        Err(NorunError::RepairFailed {
            id: prefix.id,
            reason: last_error,
        })
    }

    /// Apply the difference between the recorded toggles and `toggles`.
    async fn apply_toggles(&self, mut prefix: Prefix, toggles: &Toggles) -> Result<Prefix> {
        if prefix.toggles == *toggles {
            tracing::debug!("Toggles for {} unchanged", prefix.id);
            return Ok(prefix);
        }

        let failed = |what: &str, reason: String| NorunError::BootstrapFailed {
            id: prefix.id.clone(),
            reason: format!("{}: {}", what, reason),
        };

        if prefix.toggles.registry_differs(toggles) {
            let commands =
                self.runtime
                    .toggle_commands(&prefix.root, &prefix.runtime_version, toggles);
            for cmd in commands {
                run_step(cmd, self.step_timeout)
                    .await
                    .map_err(|reason| failed("applying toggles", reason))?;
            }
        }

        if prefix.toggles.enables_dxvk(toggles) {
            tracing::info!("Installing graphics layers into {}", prefix.id);
            let cmd = self.runtime.winetricks_command(
                &prefix.root,
                &prefix.runtime_version,
                &graphics_verbs(),
            );
            run_step(cmd, self.provision_timeout)
                .await
                .map_err(|reason| failed("installing DXVK", reason))?;
        }

        prefix.toggles = toggles.clone();
        self.store.update(&prefix)?;
        tracing::info!(
            "Applied toggles to {}: desktop={}, dxvk={}, sandbox={}",
            prefix.id,
            toggles.virtual_desktop,
            toggles.dxvk,
            toggles.sandbox
        );
        Ok(prefix)
    }

    /// wineboot, then the profile's winetricks steps, then registry toggles.
    ///
    /// A rebuilt registry has lost any virtual desktop, so an enabled one is
    /// always written back.
    async fn bootstrap(
        &self,
        prefix: &Prefix,
        desired: Desired<'_>,
    ) -> std::result::Result<(), String> {
        tracing::info!(
            "Bootstrapping prefix {} with {} ({} profile)",
            prefix.id,
            desired.version,
            desired.profile
        );
        run_step(
            self.runtime.bootstrap_command(&prefix.root, desired.version),
            self.step_timeout,
        )
        .await?;

        for verbs in desired.profile.provision_steps(desired.toggles.dxvk) {
            tracing::info!("Provisioning {}: winetricks {}", prefix.id, verbs.join(" "));
            let cmd = self
                .runtime
                .winetricks_command(&prefix.root, desired.version, &verbs);
            run_step(cmd, self.provision_timeout)
                .await
                .map_err(|reason| format!("winetricks {}: {}", verbs.join(" "), reason))?;
        }

        if desired.toggles.virtual_desktop.is_enabled()
            || prefix.toggles.registry_differs(desired.toggles)
        {
            for cmd in self
                .runtime
                .toggle_commands(&prefix.root, desired.version, desired.toggles)
            {
                run_step(cmd, self.step_timeout).await?;
            }
        }
        Ok(())
    }

    fn mark_ready(&self, mut prefix: Prefix, desired: Desired<'_>) -> Result<Prefix> {
        prefix.status = PrefixStatus::Ready;
        prefix.runtime_version = desired.version.clone();
        prefix.profile = desired.profile;
        prefix.toggles = desired.toggles.clone();
        self.store.update(&prefix)?;
        tracing::info!("Prefix {} is ready", prefix.id);
        Ok(prefix)
    }
}

/// Run a setup command to completion, killing it if it exceeds `limit`.
///
/// Returns a human-readable reason on failure.
async fn run_step(mut cmd: Command, limit: Duration) -> std::result::Result<(), String> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("failed to wait for {}: {}", program, e)),
        Err(_) => return Err(format!("{} timed out after {:?}", program, limit)),
    };

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let last_line = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no output");
    Err(format!("{} exited with {}: {}", program, output.status, last_line.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::runtime::MockCompatRuntime;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn wine9() -> RuntimeVersion {
        RuntimeVersion::new("wine-9.0").unwrap()
    }

    fn lifecycle_with(runtime: MockCompatRuntime) -> (PrefixLifecycle, TempDir) {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().join("prefixes")).unwrap();
        let store = PrefixStore::new(&dir).unwrap();
        (
            PrefixLifecycle::new(store, Arc::new(runtime), Duration::from_secs(10)),
            temp,
        )
    }

    #[tokio::test]
    async fn test_ensure_ready_creates_and_bootstraps() {
        let mut runtime = MockCompatRuntime::new();
        runtime
            .expect_bootstrap_command()
            .times(1)
            .returning(|root, _| sh(&format!("mkdir -p '{}/drive_c'", root)));
        // win10, dependencies, graphics layers
        runtime
            .expect_winetricks_command()
            .times(3)
            .returning(|_, _, _| sh("true"));
        runtime.expect_toggle_commands().never();

        let (lifecycle, _temp) = lifecycle_with(runtime);
        let prefix = lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await
            .unwrap();

        assert_eq!(prefix.status, PrefixStatus::Ready);
        assert!(prefix.drive_c().is_dir());
        assert_eq!(lifecycle.inspect("app").unwrap().status, PrefixStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_bootstrap_marks_broken() {
        let mut runtime = MockCompatRuntime::new();
        runtime
            .expect_bootstrap_command()
            .times(1)
            .returning(|_, _| sh("echo 'wineboot: cannot start' >&2; exit 3"));
        runtime.expect_winetricks_command().never();

        let (lifecycle, _temp) = lifecycle_with(runtime);
        let err = lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await
            .unwrap_err();

        match err {
            NorunError::BootstrapFailed { reason, .. } => {
                assert!(reason.contains("cannot start"), "reason: {}", reason)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(lifecycle.inspect("app").unwrap().status, PrefixStatus::Broken);

        let again = lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await;
        assert!(matches!(again, Err(NorunError::PrefixBroken(_))));
    }

    #[tokio::test]
    async fn test_repair_retries_once_then_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            sh("exit 1")
        });

        let (lifecycle, _temp) = lifecycle_with(runtime);
        let _ = lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, NorunError::RepairFailed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1 + MAX_REPAIR_ATTEMPTS);
        assert_eq!(lifecycle.inspect("app").unwrap().status, PrefixStatus::Broken);
    }

    #[tokio::test]
    async fn test_repair_succeeds_on_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().returning(move |_, _| {
            // First two calls fail: the initial bootstrap and the first repair attempt.
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                sh("exit 1")
            } else {
                sh("true")
            }
        });
        runtime
            .expect_winetricks_command()
            .returning(|_, _, _| sh("true"));

        let (lifecycle, _temp) = lifecycle_with(runtime);
        let _ = lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await;
        let prefix = lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), true)
            .await
            .unwrap();
        assert_eq!(prefix.status, PrefixStatus::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_same_toggles_twice_is_noop() {
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().times(1).returning(|_, _| sh("true"));
        runtime
            .expect_winetricks_command()
            .times(3)
            .returning(|_, _, _| sh("true"));
        runtime
            .expect_toggle_commands()
            .times(1)
            .returning(|_, _, _| vec![sh("true"), sh("true")]);

        let (lifecycle, _temp) = lifecycle_with(runtime);
        let mut toggles = Toggles::default();
        toggles.virtual_desktop = "1024x768".parse().unwrap();

        let first = lifecycle
            .ensure_ready("app", &wine9(), &toggles, false)
            .await
            .unwrap();
        let second = lifecycle
            .ensure_ready("app", &wine9(), &toggles, false)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_toggle_delta_on_ready_prefix() {
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().times(1).returning(|_, _| sh("true"));
        // Turning DXVK off installs nothing.
        runtime
            .expect_winetricks_command()
            .times(3)
            .returning(|_, _, _| sh("true"));
        // Only the desktop change touches the registry; the DXVK flip does not.
        runtime
            .expect_toggle_commands()
            .times(1)
            .returning(|_, _, _| vec![sh("true")]);

        let (lifecycle, _temp) = lifecycle_with(runtime);
        lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await
            .unwrap();

        let mut no_dxvk = Toggles::default();
        no_dxvk.dxvk = false;
        let prefix = lifecycle
            .ensure_ready("app", &wine9(), &no_dxvk, false)
            .await
            .unwrap();
        assert!(!prefix.toggles.dxvk);

        let mut desktop = no_dxvk.clone();
        desktop.virtual_desktop = "800x600".parse().unwrap();
        let prefix = lifecycle
            .ensure_ready("app", &wine9(), &desktop, false)
            .await
            .unwrap();
        assert_eq!(prefix.toggles, desktop);
        assert_eq!(lifecycle.inspect("app").unwrap().toggles, desktop);
    }

    #[tokio::test]
    async fn test_runtime_change_rebootstraps() {
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().times(2).returning(|_, _| sh("true"));
        runtime
            .expect_winetricks_command()
            .returning(|_, _, _| sh("true"));

        let (lifecycle, _temp) = lifecycle_with(runtime);
        lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await
            .unwrap();

        let newer = RuntimeVersion::new("wine-10.0").unwrap();
        let prefix = lifecycle
            .ensure_ready("app", &newer, &Toggles::default(), false)
            .await
            .unwrap();
        assert_eq!(prefix.runtime_version, newer);
    }

    #[tokio::test]
    async fn test_bootstrap_timeout_is_bounded() {
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().returning(|_, _| sh("sleep 30"));

        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().join("prefixes")).unwrap();
        let lifecycle = PrefixLifecycle::new(
            PrefixStore::new(&dir).unwrap(),
            Arc::new(runtime),
            Duration::from_millis(200),
        );

        let started = std::time::Instant::now();
        let err = lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_profile_provisions_verbs_in_order() {
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
        let recorder = seen.clone();
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().times(1).returning(|_, _| sh("true"));
        runtime
            .expect_winetricks_command()
            .returning(move |_, _, verbs| {
                recorder.lock().unwrap().push(verbs.to_vec());
                sh("true")
            });

        let (lifecycle, _temp) = lifecycle_with(runtime);
        let mut toggles = Toggles::default();
        toggles.dxvk = false;
        let prefix = lifecycle
            .ensure_ready_with("app", &wine9(), Some(Profile::Dotnet), &toggles, false)
            .await
            .unwrap();

        assert_eq!(prefix.profile, Profile::Dotnet);
        assert_eq!(lifecycle.inspect("app").unwrap().profile, Profile::Dotnet);
        assert_eq!(*seen.lock().unwrap(), Profile::Dotnet.provision_steps(false));
    }

    #[tokio::test]
    async fn test_failed_provisioning_marks_broken() {
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().returning(|_, _| sh("true"));
        runtime
            .expect_winetricks_command()
            .returning(|_, _, _| sh("echo 'download failed' >&2; exit 1"));

        let (lifecycle, _temp) = lifecycle_with(runtime);
        let err = lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("winetricks win10"), "{}", err);
        assert!(err.to_string().contains("download failed"), "{}", err);
        assert_eq!(lifecycle.inspect("app").unwrap().status, PrefixStatus::Broken);
    }

    #[tokio::test]
    async fn test_enabling_dxvk_installs_graphics_layers() {
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
        let recorder = seen.clone();
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().times(1).returning(|_, _| sh("true"));
        runtime
            .expect_winetricks_command()
            .returning(move |_, _, verbs| {
                recorder.lock().unwrap().push(verbs.to_vec());
                sh("true")
            });
        runtime.expect_toggle_commands().never();

        let (lifecycle, _temp) = lifecycle_with(runtime);
        let mut off = Toggles::default();
        off.dxvk = false;
        lifecycle
            .create_with_profile("app", &wine9(), Profile::Bare)
            .unwrap();
        lifecycle
            .ensure_ready("app", &wine9(), &off, false)
            .await
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());

        let mut on = off.clone();
        on.dxvk = true;
        let prefix = lifecycle
            .ensure_ready("app", &wine9(), &on, false)
            .await
            .unwrap();
        assert!(prefix.toggles.dxvk);
        assert_eq!(*seen.lock().unwrap(), vec![graphics_verbs()]);

        // Already on: nothing to install.
        lifecycle
            .ensure_ready("app", &wine9(), &on, false)
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repair_writes_back_virtual_desktop() {
        let toggle_calls = Arc::new(AtomicUsize::new(0));
        let counter = toggle_calls.clone();
        let mut runtime = MockCompatRuntime::new();
        runtime
            .expect_bootstrap_command()
            .returning(|root, _| sh(&format!("mkdir -p '{}/drive_c'", root)));
        runtime
            .expect_winetricks_command()
            .returning(|_, _, _| sh("true"));
        runtime.expect_toggle_commands().returning(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![sh("true")]
        });

        let (lifecycle, _temp) = lifecycle_with(runtime);
        let mut desktop = Toggles::default();
        desktop.virtual_desktop = "1280x720".parse().unwrap();
        let prefix = lifecycle
            .ensure_ready("app", &wine9(), &desktop, false)
            .await
            .unwrap();
        assert_eq!(toggle_calls.load(Ordering::SeqCst), 1);

        std::fs::remove_dir_all(prefix.drive_c()).unwrap();
        lifecycle.check_health("app").unwrap();
        let repaired = lifecycle
            .ensure_ready("app", &wine9(), &desktop, true)
            .await
            .unwrap();

        assert_eq!(repaired.status, PrefixStatus::Ready);
        assert_eq!(toggle_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_profile_change_rebootstraps() {
        let boots = Arc::new(AtomicUsize::new(0));
        let counter = boots.clone();
        let mut runtime = MockCompatRuntime::new();
        runtime.expect_bootstrap_command().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            sh("true")
        });
        runtime
            .expect_winetricks_command()
            .returning(|_, _, _| sh("true"));

        let (lifecycle, _temp) = lifecycle_with(runtime);
        lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await
            .unwrap();
        // Without an explicit profile the recorded one is kept.
        lifecycle
            .ensure_ready("app", &wine9(), &Toggles::default(), false)
            .await
            .unwrap();
        assert_eq!(boots.load(Ordering::SeqCst), 1);

        let prefix = lifecycle
            .ensure_ready_with("app", &wine9(), Some(Profile::Games), &Toggles::default(), false)
            .await
            .unwrap();
        assert_eq!(prefix.profile, Profile::Games);
        assert_eq!(boots.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_destroy_removes_session_logs() {
        let (lifecycle, temp) = lifecycle_with(MockCompatRuntime::new());
        let logs = Utf8PathBuf::try_from(temp.path().join("logs")).unwrap();
        let lifecycle = lifecycle.with_logs_dir(logs.clone());

        lifecycle.create("app", &wine9()).unwrap();
        lifecycle.create("other", &wine9()).unwrap();
        std::fs::create_dir_all(logs.join("app")).unwrap();
        std::fs::write(logs.join("app").join("1.log"), "x").unwrap();
        std::fs::create_dir_all(logs.join("other")).unwrap();

        lifecycle.destroy("app").unwrap();
        assert!(!logs.join("app").exists());
        assert!(logs.join("other").exists());
    }

    #[test]
    fn test_check_health_marks_missing_drive_broken() {
        let (lifecycle, _temp) = lifecycle_with(MockCompatRuntime::new());
        let mut prefix = lifecycle.create("app", &wine9()).unwrap();
        prefix.status = PrefixStatus::Ready;
        lifecycle.store().update(&prefix).unwrap();

        let checked = lifecycle.check_health("app").unwrap();
        assert_eq!(checked.status, PrefixStatus::Broken);
    }
}
