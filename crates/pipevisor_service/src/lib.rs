//! Pipevisor service supervision
//!
//! Runs the pipeline engine as a child process and answers one question for
//! integration tooling: did it come up?
//!
//! - [`ServiceSupervisor`] spawns the engine with stdin kept open, sends both
//!   output streams into one [`SynchronizedSink`], polls readiness under a
//!   fixed attempt budget and tears the process down deterministically.
//! - [`run_to_completion`] runs one-shot commands (plugin tooling) with the
//!   same output wiring and a hard timeout.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut supervisor = ServiceSupervisor::new(SupervisorConfig::default())?;
//! let spec = CommandSpec::new("bin/engine").args(["-e", "input { stdin {} } output { }"]);
//! supervisor.spawn(spec, Arc::new(SynchronizedSink::stdout()))?;
//! supervisor.wait_until_port_open(ReadinessPolicy::default()).await?;
//! supervisor.write_to_stdin("hello").await?;
//! supervisor.teardown().await?;
//! ```

pub mod command;
pub mod monitoring;
pub mod readiness;
pub mod sink;
pub mod supervisor;

pub use command::{run_to_completion, CommandSpec, ProcessStatus, TIMEOUT_MAXIMUM};
pub use monitoring::{MonitoringApi, MonitoringError, NodeInfo};
pub use readiness::{
    poll_until, ApiProbe, PortProbe, ReadinessPolicy, ReadinessProbe, ReadinessTimeout,
    RETRY_ATTEMPTS, RETRY_INTERVAL,
};
pub use sink::{SinkError, SinkTarget, SynchronizedSink};
pub use supervisor::{
    ProcessHandle, ServiceSupervisor, SupervisorConfig, SupervisorError, SETTINGS_CLI_FLAG,
};
