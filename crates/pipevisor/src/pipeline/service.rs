//! Pipeline backed by the engine running as a child process.

use async_trait::async_trait;
use pipevisor_service::{
    CommandSpec, ReadinessPolicy, ServiceSupervisor, SupervisorConfig, SupervisorError,
    SynchronizedSink,
};
use std::io::Stdout;
use std::sync::Arc;
use tokio::sync::watch;

use super::{Pipeline, PipelineFactory, Result};
use crate::settings::SettingsRegistry;

/// Settings consumed here and never forwarded to the engine.
const LOCAL_ONLY: &[&str] = &[
    "engine.command",
    "allow_superuser",
    "path.settings",
    "config.test_and_exit",
];

/// `--<key>=<value>` for every explicitly set setting the engine consumes.
///
/// Settings left at their defaults are not forwarded so the engine applies
/// its own defaults.
pub fn engine_args(settings: &SettingsRegistry) -> Vec<String> {
    settings
        .explicit()
        .filter(|s| !LOCAL_ONLY.contains(&s.key()))
        .map(|s| format!("--{}={}", s.key(), s.value()))
        .collect()
}

/// Runs the engine, waits for its monitoring API and relays its exit code.
pub struct ServicePipeline {
    supervisor: ServiceSupervisor,
    command: CommandSpec,
    api_enabled: bool,
    readiness: ReadinessPolicy,
    sink: Arc<SynchronizedSink<Stdout>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ServicePipeline {
    pub fn from_settings(settings: &SettingsRegistry) -> Result<Self> {
        let ports = settings.get_range("api.http.port")?;
        let config = SupervisorConfig {
            name: "engine".to_string(),
            api_host: settings.get_string("api.http.host")?.to_string(),
            // The engine binds the first free port of the range.
            api_port: ports.low,
            settings_dir: Some(settings.get_path("path.settings")?.to_path_buf()),
            ..Default::default()
        };

        let command =
            CommandSpec::new(settings.get_path("engine.command")?).args(engine_args(settings));

        Ok(Self {
            supervisor: ServiceSupervisor::new(config)?,
            command,
            api_enabled: settings.get_bool("api.enabled")?,
            readiness: ReadinessPolicy::default(),
            sink: Arc::new(SynchronizedSink::stdout()),
            shutdown: None,
        })
    }

    /// Tear the engine down once `signal` turns true.
    pub fn with_shutdown_signal(mut self, signal: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(signal);
        self
    }

    pub fn with_readiness_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = policy;
        self
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Poll the monitoring API until it answers, the engine exits, or the
    /// budget runs out. Only an unexpected supervisor error is returned.
    async fn await_readiness(&mut self) -> Result<bool> {
        let name = self.supervisor.config().name.clone();
        let policy = self.readiness;

        for attempt in 1..=policy.attempts {
            if self.shutdown_requested() {
                return Ok(false);
            }
            let api = match self.supervisor.monitoring_api() {
                Ok(api) => api,
                Err(SupervisorError::Exited { exit_code, .. }) => {
                    log::error!("[{}] Exited during startup (code {:?})", name, exit_code);
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };
            if api.node_info().await.is_ok() {
                log::info!(
                    "[{}] Monitoring API responsive at {} after {} attempt(s)",
                    name,
                    api.base_url(),
                    attempt
                );
                return Ok(true);
            }
            if attempt < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        log::warn!(
            "[{}] Monitoring API did not respond after {} attempts",
            name,
            policy.attempts
        );
        Ok(false)
    }
}

async fn wait_for_shutdown(signal: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = signal {
        let closed = rx.wait_for(|requested| *requested).await.is_err();
        if !closed {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[async_trait]
impl Pipeline for ServicePipeline {
    async fn execute(&mut self) -> Result<i32> {
        let name = self.supervisor.config().name.clone();
        self.supervisor
            .spawn(self.command.clone(), Arc::clone(&self.sink))?;

        if self.api_enabled {
            self.await_readiness().await?;
        }

        let code = tokio::select! {
            status = self.supervisor.wait_for_exit() => status?.unwrap_or(1),
            _ = wait_for_shutdown(&mut self.shutdown) => {
                log::info!("[{}] Shutdown requested, stopping engine", name);
                self.supervisor.teardown().await?;
                0
            }
        };
        Ok(code)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.supervisor.teardown().await?;
        Ok(())
    }
}

/// Creates [`ServicePipeline`]s that share one shutdown signal.
#[derive(Clone, Default)]
pub struct ServicePipelineFactory {
    shutdown: Option<watch::Receiver<bool>>,
}

impl ServicePipelineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shutdown_signal(mut self, signal: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(signal);
        self
    }
}

impl PipelineFactory for ServicePipelineFactory {
    fn create(&self, settings: &SettingsRegistry) -> Result<Box<dyn Pipeline>> {
        let mut pipeline = ServicePipeline::from_settings(settings)?;
        if let Some(signal) = &self.shutdown {
            pipeline = pipeline.with_shutdown_signal(signal.clone());
        }
        Ok(Box::new(pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingValue;
    use std::time::Duration;

    #[test]
    fn only_explicit_engine_settings_are_forwarded() {
        let mut settings = SettingsRegistry::new();
        settings
            .set("pipeline.workers", SettingValue::Int(3))
            .unwrap();
        settings
            .set("config.string", SettingValue::String("input { } output { }".into()))
            .unwrap();
        settings
            .set("allow_superuser", SettingValue::Bool(true))
            .unwrap();
        settings
            .set("engine.command", SettingValue::Path("/opt/engine".into()))
            .unwrap();

        assert_eq!(
            engine_args(&settings),
            vec![
                "--config.string=input { } output { }".to_string(),
                "--pipeline.workers=3".to_string(),
            ]
        );
    }

    #[test]
    fn defaults_forward_nothing() {
        assert!(engine_args(&SettingsRegistry::new()).is_empty());
    }

    #[test]
    fn command_uses_engine_setting() {
        let mut settings = SettingsRegistry::new();
        settings
            .set("engine.command", SettingValue::Path("/opt/engine/bin/run".into()))
            .unwrap();
        settings
            .set("pipeline.batch.size", SettingValue::Int(10))
            .unwrap();

        let pipeline = ServicePipeline::from_settings(&settings).unwrap();
        assert_eq!(
            pipeline.command().program,
            std::path::PathBuf::from("/opt/engine/bin/run")
        );
        assert_eq!(pipeline.command().args, vec!["--pipeline.batch.size=10"]);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        fn write_engine(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("engine.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn settings_for(engine: PathBuf, api_enabled: bool) -> SettingsRegistry {
            let mut settings = SettingsRegistry::new();
            settings
                .set("engine.command", SettingValue::Path(engine))
                .unwrap();
            settings
                .set("api.enabled", SettingValue::Bool(api_enabled))
                .unwrap();
            settings
        }

        #[tokio::test]
        async fn relays_engine_exit_code() {
            let dir = tempfile::tempdir().unwrap();
            let engine = write_engine(dir.path(), "exit 3");

            let mut pipeline = ServicePipeline::from_settings(&settings_for(engine, false)).unwrap();
            assert_eq!(pipeline.execute().await.unwrap(), 3);
            pipeline.shutdown().await.unwrap();
        }

        #[tokio::test]
        async fn engine_dying_during_startup_is_not_awaited_for_the_full_budget() {
            let dir = tempfile::tempdir().unwrap();
            let engine = write_engine(dir.path(), "exit 5");

            let mut pipeline = ServicePipeline::from_settings(&settings_for(engine, true))
                .unwrap()
                .with_readiness_policy(ReadinessPolicy::new(50, Duration::from_millis(100)));

            let started = std::time::Instant::now();
            assert_eq!(pipeline.execute().await.unwrap(), 5);
            assert!(started.elapsed() < Duration::from_secs(4));
        }

        #[tokio::test]
        async fn shutdown_signal_stops_engine() {
            let dir = tempfile::tempdir().unwrap();
            let engine = write_engine(dir.path(), "exec sleep 30");
            let (tx, rx) = watch::channel(false);

            let mut pipeline = ServicePipeline::from_settings(&settings_for(engine, false))
                .unwrap()
                .with_shutdown_signal(rx);

            let stopper = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                tx.send(true).unwrap();
                tx
            });

            assert_eq!(pipeline.execute().await.unwrap(), 0);
            pipeline.shutdown().await.unwrap();
            drop(stopper.await.unwrap());
        }
    }
}
