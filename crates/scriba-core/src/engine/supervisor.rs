//! Engine process supervision.
//!
//! Spawns the engine executable headless in its own session, waits for
//! its control socket to come up with a bounded TCP health check, and
//! tears the whole process group down again on request. Termination is
//! idempotent and safe to call concurrently from the watchdog.

use super::handle::{EngineHandle, EngineState};
use crate::config::EngineConfig;
use crate::error::{Result, ScribaError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Configuration for spawning one engine process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Path to the engine executable.
    pub executable: PathBuf,
    /// Interface the engine control socket binds to.
    pub interface: String,
    /// Port for the engine control socket.
    pub port: u16,
    /// Private user-profile directory for this engine instance.
    pub user_profile_dir: PathBuf,
    /// Path to write the engine PID to, if any.
    pub pid_file: Option<PathBuf>,
    /// Total time the engine gets to start listening.
    pub startup_timeout: Duration,
}

impl LaunchSpec {
    /// Create a launch spec with default interface, port and timeout.
    pub fn new(executable: impl Into<PathBuf>, user_profile_dir: impl AsRef<Path>) -> Self {
        Self {
            executable: executable.into(),
            interface: EngineConfig::DEFAULT_INTERFACE.to_string(),
            port: EngineConfig::DEFAULT_PORT,
            user_profile_dir: user_profile_dir.as_ref().to_path_buf(),
            pid_file: None,
            startup_timeout: EngineConfig::STARTUP_WAIT_BUDGET,
        }
    }

    /// Set the control socket endpoint.
    pub fn with_endpoint(mut self, interface: impl Into<String>, port: u16) -> Self {
        self.interface = interface.into();
        self.port = port;
        self
    }

    /// Set the PID file path.
    pub fn with_pid_file(mut self, path: impl AsRef<Path>) -> Self {
        self.pid_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the startup wait budget.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

/// Supervisor owning one engine child process.
#[derive(Debug, Default)]
pub struct EngineSupervisor {
    child: Mutex<Option<Child>>,
}

impl EngineSupervisor {
    /// Spawn the engine process described by the spec.
    ///
    /// The returned handle is still in `Starting`; follow up with
    /// [`EngineSupervisor::wait_until_ready`] before using the engine.
    #[allow(unsafe_code)]
    pub async fn spawn(spec: &LaunchSpec) -> Result<(Self, Arc<EngineHandle>)> {
        let mut cmd = Command::new(&spec.executable);
        cmd.arg("--headless")
            .arg("--invisible")
            .arg("--norestore")
            .arg(format!("--listen={}:{}", spec.interface, spec.port))
            .arg(format!(
                "--user-profile={}",
                spec.user_profile_dir.display()
            ));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd.kill_on_drop(false);

        // Detach the engine into its own session so the whole subtree can
        // be signalled as one process group.
        #[cfg(unix)]
        {
            // SAFETY: setsid() is async-signal-safe; the child becomes a
            // session and process-group leader, so killpg(pid) reaches it
            // and all of its descendants.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        info!(
            executable = %spec.executable.display(),
            port = spec.port,
            "Launching engine"
        );

        let child = cmd.spawn().map_err(|e| ScribaError::EngineLaunch {
            executable: spec.executable.clone(),
            message: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| ScribaError::EngineLaunch {
            executable: spec.executable.clone(),
            message: "process exited before its pid could be read".to_string(),
        })?;

        if let Some(ref pid_file) = spec.pid_file {
            if let Err(e) = std::fs::write(pid_file, pid.to_string()) {
                warn!("Failed to write engine PID file: {}", e);
            }
        }

        info!("Engine process started with PID {}", pid);

        let handle = Arc::new(EngineHandle::new(
            pid,
            spec.interface.clone(),
            spec.port,
            spec.user_profile_dir.clone(),
        ));

        Ok((
            Self {
                child: Mutex::new(Some(child)),
            },
            handle,
        ))
    }

    /// Wait for the engine control socket to accept connections.
    ///
    /// Polls with per-attempt connect timeouts until the budget runs out.
    /// On timeout the process is killed and `EngineStartupTimeout` is
    /// returned; the engine never becomes usable after a failed startup.
    pub async fn wait_until_ready(
        &self,
        handle: &EngineHandle,
        budget: Duration,
    ) -> Result<()> {
        let addr = format!("{}:{}", handle.interface(), handle.port());
        let start = tokio::time::Instant::now();

        debug!("Waiting for engine at {} to accept connections", addr);

        while start.elapsed() < budget {
            if let Some(status) = self.try_reap().await {
                warn!("Engine exited during startup: {}", status);
                break;
            }

            let attempt = tokio::time::timeout(
                EngineConfig::HEALTH_CHECK_ATTEMPT_TIMEOUT,
                TcpStream::connect(&addr),
            )
            .await;

            if matches!(attempt, Ok(Ok(_))) {
                info!("Engine is ready on {}", addr);
                handle.set_state(EngineState::Ready);
                return Ok(());
            }

            tokio::time::sleep(EngineConfig::HEALTH_CHECK_INTERVAL).await;
        }

        let waited = start.elapsed();
        warn!("Engine did not start listening within {:?}", waited);
        self.terminate(handle).await;
        Err(ScribaError::EngineStartupTimeout { waited })
    }

    /// Terminate the engine process group.
    ///
    /// SIGTERM first, then SIGKILL after the grace period. Idempotent:
    /// a dead engine is just marked `Dead` again.
    pub async fn terminate(&self, handle: &EngineHandle) {
        let pid = handle.pid();
        handle.set_state(EngineState::Terminating);

        if !is_process_alive(pid) {
            debug!("Engine {} is not running", pid);
            self.try_reap().await;
            handle.set_state(EngineState::Dead);
            return;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::Signal;

            debug!("Sending SIGTERM to engine process group {}", pid);
            signal_group(pid, Signal::SIGTERM);

            let wait_interval = Duration::from_millis(100);
            let iterations =
                (EngineConfig::TERMINATE_GRACE.as_millis() / wait_interval.as_millis()).max(1);

            for _ in 0..iterations {
                tokio::time::sleep(wait_interval).await;
                self.try_reap().await;
                if !is_process_alive(pid) {
                    debug!("Engine {} terminated gracefully", pid);
                    handle.set_state(EngineState::Dead);
                    return;
                }
            }

            debug!("Engine {} still running, sending SIGKILL", pid);
            signal_group(pid, Signal::SIGKILL);
            tokio::time::sleep(wait_interval).await;
            self.try_reap().await;
        }

        #[cfg(not(unix))]
        {
            let mut guard = self.child.lock().await;
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
                let _ = child.wait().await;
                *guard = None;
            }
        }

        handle.set_state(EngineState::Dead);
    }

    /// Wait for the engine process to exit on its own.
    ///
    /// Takes ownership of the child so concurrent `terminate()` calls
    /// never block behind this await. Returns `None` when the child was
    /// already consumed.
    pub async fn wait(&self) -> Option<std::process::ExitStatus> {
        let child = self.child.lock().await.take();
        match child {
            Some(mut child) => child.wait().await.ok(),
            None => None,
        }
    }

    /// Reap the child if it has exited (non-blocking).
    async fn try_reap(&self) -> Option<std::process::ExitStatus> {
        let mut guard = self.child.lock().await;
        let status = guard.as_mut().and_then(|c| c.try_wait().ok().flatten());
        if status.is_some() {
            *guard = None;
        }
        status
    }
}

/// Check if a process with the given PID is alive via `kill(pid, 0)`.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        warn!("Process alive check not implemented for this platform");
        true
    }
}

/// Signal the whole process group led by `pid`, falling back to the
/// single process when it is not a group leader.
#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(pid as i32);
    if let Err(e) = killpg(nix_pid, signal) {
        if e != nix::errno::Errno::ESRCH {
            if let Err(e) = kill(nix_pid, signal) {
                if e != nix::errno::Errno::ESRCH {
                    warn!("Failed to send {:?} to engine {}: {}", signal, pid, e);
                }
            }
        }
    }
}
