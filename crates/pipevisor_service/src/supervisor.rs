//! Lifecycle of one engine run as a child process

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;

use crate::command::{attach_output, drain_output, CommandSpec};
use crate::monitoring::{MonitoringApi, MonitoringError};
use crate::readiness::{poll_until, ApiProbe, PortProbe, ReadinessPolicy, ReadinessTimeout};
use crate::sink::{SinkError, SinkTarget, SynchronizedSink};

/// Flag used to point the engine at its settings directory.
pub const SETTINGS_CLI_FLAG: &str = "--path.settings";

/// Errors that can occur while supervising the engine
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Process '{0}' is not running")]
    NotRunning(String),

    #[error("Process '{name}' is not up because of an error, or it stopped (exit code {exit_code:?})")]
    Exited { name: String, exit_code: Option<i32> },

    #[error(transparent)]
    Readiness(#[from] ReadinessTimeout),

    #[error("Command '{command}' did not finish within {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Monitoring API error: {0}")]
    Monitoring(#[from] MonitoringError),

    #[error("Output sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Runtime record of the spawned process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub started_at: Instant,
    pub alive: bool,
    pub exit_code: Option<i32>,
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Name used in log lines
    pub name: String,
    /// Monitoring API host probed for readiness
    pub api_host: String,
    /// Monitoring API port probed for readiness
    pub api_port: u16,
    /// Settings directory appended as `--path.settings` unless the caller passes one
    pub settings_dir: Option<PathBuf>,
    /// Grace period between SIGTERM and SIGKILL
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "engine".to_string(),
            api_host: "127.0.0.1".to_string(),
            api_port: 9600,
            settings_dir: None,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Owns at most one engine process at a time.
pub struct ServiceSupervisor {
    config: SupervisorConfig,
    monitoring: MonitoringApi,
    handle: Option<ProcessHandle>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    pumps: Vec<JoinHandle<()>>,
}

impl ServiceSupervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        let monitoring = MonitoringApi::new(&config.api_host, config.api_port)?;
        Ok(Self {
            config,
            monitoring,
            handle: None,
            child: None,
            stdin: None,
            pumps: Vec::new(),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.handle.as_ref().and_then(|h| h.exit_code)
    }

    /// Start the engine with stdin kept open and both output streams
    /// redirected into `sink`.
    pub fn spawn<W>(&mut self, spec: CommandSpec, sink: Arc<SynchronizedSink<W>>) -> Result<&ProcessHandle>
    where
        W: SinkTarget + 'static,
    {
        if self.child.is_some() {
            match self.is_alive() {
                Ok(_) => return Err(SupervisorError::AlreadyRunning(self.config.name.clone())),
                Err(_) => self.release(),
            }
        }

        let spec = self.with_settings_dir(spec);
        log::info!("[{}] Starting: {}", self.config.name, spec.display());

        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| {
            log::error!("[{}] Failed to spawn: {}", self.config.name, source);
            SupervisorError::Spawn {
                command: spec.display(),
                source,
            }
        })?;

        let pid = child.id().unwrap_or(0);
        self.stdin = child.stdin.take();
        self.pumps = attach_output(&self.config.name, &mut child, &sink);
        self.child = Some(child);
        log::info!("[{}] Started with PID {}", self.config.name, pid);

        Ok(&*self.handle.insert(ProcessHandle {
            pid,
            started_at: Instant::now(),
            alive: true,
            exit_code: None,
        }))
    }

    fn with_settings_dir(&self, spec: CommandSpec) -> CommandSpec {
        match &self.config.settings_dir {
            Some(dir) if !spec.has_arg(SETTINGS_CLI_FLAG) => {
                log::info!(
                    "[{}] Using settings directory {}",
                    self.config.name,
                    dir.display()
                );
                spec.arg(SETTINGS_CLI_FLAG)
                    .arg(dir.to_string_lossy().into_owned())
            }
            _ => spec,
        }
    }

    /// `Ok(true)` while the process runs.
    ///
    /// A process that already exited (or was never started) is an error: the
    /// engine died instead of running.
    pub fn is_alive(&mut self) -> Result<bool> {
        let Some(child) = self.child.as_mut() else {
            return Err(SupervisorError::NotRunning(self.config.name.clone()));
        };

        match child.try_wait()? {
            None => Ok(true),
            Some(status) => {
                let code = status.code();
                if let Some(handle) = self.handle.as_mut() {
                    handle.alive = false;
                    handle.exit_code = code;
                }
                Err(SupervisorError::Exited {
                    name: self.config.name.clone(),
                    exit_code: code,
                })
            }
        }
    }

    /// Write one line to the engine's stdin.
    pub async fn write_to_stdin(&mut self, input: &str) -> Result<()> {
        self.is_alive()?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SupervisorError::NotRunning(self.config.name.clone()))?;
        stdin.write_all(input.as_bytes()).await?;
        if !input.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await?;
        Ok(())
    }

    /// Wait for the process to exit on its own and record its exit code.
    pub async fn wait_for_exit(&mut self) -> Result<Option<i32>> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| SupervisorError::NotRunning(self.config.name.clone()))?;
        let status = child.wait().await?;
        let code = status.code();
        log::info!("[{}] Process exited with code: {:?}", self.config.name, code);

        if let Some(handle) = self.handle.as_mut() {
            handle.alive = false;
            handle.exit_code = code;
        }
        drain_output(&self.config.name, std::mem::take(&mut self.pumps)).await;
        Ok(code)
    }

    /// Monitoring API client; only handed out while the engine is alive.
    pub fn monitoring_api(&mut self) -> Result<&MonitoringApi> {
        self.is_alive()?;
        Ok(&self.monitoring)
    }

    /// Poll the monitoring port with a bare TCP connect.
    pub async fn wait_until_port_open(&self, policy: ReadinessPolicy) -> Result<u32> {
        let probe = PortProbe::new(self.config.api_host.clone(), self.config.api_port);
        Ok(poll_until(&probe, policy).await?)
    }

    /// Poll the monitoring API with a node-info request.
    pub async fn wait_until_api_responsive(&self, policy: ReadinessPolicy) -> Result<u32> {
        let probe = ApiProbe::new(&self.monitoring);
        Ok(poll_until(&probe, policy).await?)
    }

    /// Close stdin, ask the process to terminate, then forget it.
    ///
    /// Calling this without an active process is a no-op.
    pub async fn teardown(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            self.handle = None;
            return Ok(());
        };

        drop(self.stdin.take());
        log::info!("[{}] Stopping process...", self.config.name);

        let result = terminate(&self.config.name, &mut child, self.config.shutdown_timeout).await;

        drain_output(&self.config.name, std::mem::take(&mut self.pumps)).await;
        self.handle = None;
        result
    }

    fn release(&mut self) {
        self.child = None;
        self.stdin = None;
        self.handle = None;
        self.pumps.clear();
    }
}

/// SIGTERM, bounded wait, then SIGKILL.
async fn terminate(name: &str, child: &mut Child, grace: Duration) -> Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            log::info!("[{}] Process exited with code: {:?}", name, status.code());
            Ok(())
        }
        Ok(Err(e)) => {
            log::error!("[{}] Error waiting for process: {}", name, e);
            Err(e.into())
        }
        Err(_) => {
            log::warn!("[{}] Process did not exit gracefully, forcing kill", name);
            child.kill().await?;
            Ok(())
        }
    }
}
