//! Structured command specifications and one-shot command execution

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::sink::{SinkTarget, SynchronizedSink};
use crate::supervisor::{Result, SupervisorError};

/// Upper bound for a one-shot command (plugin tooling can be slow).
pub const TIMEOUT_MAXIMUM: Duration = Duration::from_secs(60 * 10);

/// How long output pumps may keep draining once the child has exited.
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Program, argument list and environment for a child process.
///
/// Arguments are passed to the OS verbatim; nothing is ever joined into a
/// shell string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable path (or bare name resolved through PATH)
    pub program: PathBuf,
    /// Command line arguments
    pub args: Vec<String>,
    /// Environment overrides; each replaces the inherited value entirely
    pub env: BTreeMap<String, String>,
    /// Inherited variables to drop before overrides are applied
    pub env_remove: Vec<String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// True if `flag` appears verbatim in the argument list.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Human-readable rendering for logs and error messages.
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for key in &self.env_remove {
            cmd.env_remove(key);
        }
        cmd.envs(&self.env);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Outcome of a one-shot command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Exit code; `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr
    pub output: String,
}

impl ProcessStatus {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `spec` to completion, capturing stdout and stderr into one buffer.
///
/// The child is killed if it outlives `timeout`.
pub async fn run_to_completion(spec: &CommandSpec, timeout: Duration) -> Result<ProcessStatus> {
    log::debug!("Running: {}", spec.display());

    let sink = Arc::new(SynchronizedSink::capture());
    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
        command: spec.display(),
        source,
    })?;
    let pumps = attach_output("command", &mut child, &sink);

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            log::warn!("Command did not finish within {:?}, killing: {}", timeout, spec.display());
            let _ = child.kill().await;
            return Err(SupervisorError::CommandTimeout {
                command: spec.display(),
                timeout,
            });
        }
    };

    drain_output("command", pumps).await;

    let output = sink.snapshot()?;
    Ok(ProcessStatus {
        exit_code: status.code(),
        output: String::from_utf8_lossy(&output).into_owned(),
    })
}

/// Start one pump task per captured output pipe, all feeding `sink`.
pub(crate) fn attach_output<W>(
    name: &str,
    child: &mut Child,
    sink: &Arc<SynchronizedSink<W>>,
) -> Vec<JoinHandle<()>>
where
    W: SinkTarget + 'static,
{
    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(
            format!("{name}/stdout"),
            stdout,
            Arc::clone(sink),
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(
            format!("{name}/stderr"),
            stderr,
            Arc::clone(sink),
        )));
    }
    pumps
}

/// Join the pumps, abandoning any whose pipe is still held open (typically
/// by a background grandchild) after [`OUTPUT_DRAIN_TIMEOUT`].
pub(crate) async fn drain_output(name: &str, pumps: Vec<JoinHandle<()>>) {
    for mut pump in pumps {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut pump)
            .await
            .is_err()
        {
            log::debug!("[{}] Output still open after exit, detaching", name);
            pump.abort();
        }
    }
}

async fn pump<R, W>(label: String, mut reader: R, sink: Arc<SynchronizedSink<W>>)
where
    R: AsyncRead + Unpin,
    W: SinkTarget,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = sink.write_all(&buf[..n]) {
                    log::warn!("[{}] Dropping output: {}", label, e);
                    break;
                }
            }
            Err(e) => {
                log::debug!("[{}] Read error: {}", label, e);
                break;
            }
        }
    }
    let _ = sink.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_args_and_env() {
        let spec = CommandSpec::new("/bin/engine")
            .arg("-e")
            .arg("input {} output {}")
            .args(["--path.settings", "/etc/engine"])
            .env("ENGINE_JAVA_HOME", "/opt/jdk")
            .env_remove("ENGINE_OPTS");

        assert_eq!(spec.args.len(), 4);
        assert!(spec.has_arg("--path.settings"));
        assert!(!spec.has_arg("/etc"));
        assert_eq!(spec.env.get("ENGINE_JAVA_HOME").map(String::as_str), Some("/opt/jdk"));
        assert_eq!(spec.env_remove, vec!["ENGINE_OPTS".to_string()]);
    }

    #[test]
    fn env_override_replaces_previous_value() {
        let spec = CommandSpec::new("x").env("A", "one").env("A", "two");
        assert_eq!(spec.env.len(), 1);
        assert_eq!(spec.env["A"], "two");
    }

    #[test]
    fn display_keeps_arguments_unescaped() {
        let spec = CommandSpec::new("bin/engine").args(["-e", "input { stdin {} }"]);
        assert_eq!(spec.display(), "bin/engine -e input { stdin {} }");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_to_completion_captures_both_streams() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let status = run_to_completion(&spec, Duration::from_secs(10)).await.unwrap();
        assert_eq!(status.exit_code, Some(3));
        assert!(!status.success());
        assert!(status.output.contains("out\n"));
        assert!(status.output.contains("err\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_to_completion_passes_explicit_env() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "printf %s \"$PIPEVISOR_TEST_VALUE\""])
            .env("PIPEVISOR_TEST_VALUE", "a b c");
        let status = run_to_completion(&spec, Duration::from_secs(10)).await.unwrap();
        assert!(status.success());
        assert_eq!(status.output, "a b c");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_to_completion_times_out() {
        let spec = CommandSpec::new("sleep").arg("5");
        let err = run_to_completion(&spec, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::CommandTimeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_to_completion_does_not_wait_for_background_children() {
        let spec = CommandSpec::new("sh").args(["-c", "echo started; sleep 6 & exit 3"]);
        let started = std::time::Instant::now();
        let status = run_to_completion(&spec, Duration::from_secs(30)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(status.exit_code, Some(3));
        assert!(status.output.contains("started"));
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let spec = CommandSpec::new("/definitely/not/here/engine");
        let err = run_to_completion(&spec, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }
}
