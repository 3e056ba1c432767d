//! The default host: real processes and git, pluggable containers and
//! telemetry.

use crate::host::{CapabilityHost, HostError, codes};
use kiln_core::Deadline;
use kiln_log::{Coverage, Event, EventSink, Message, Metric};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Container lifecycle provider
pub trait ContainerBackend: Send + Sync {
    /// Pull an image
    ///
    /// # Errors
    ///
    /// Returns the host failure
    fn pull(&self, image: &str, deadline: Deadline) -> Result<(), HostError>;

    /// Build an image
    ///
    /// # Errors
    ///
    /// Returns the host failure
    fn build(&self, context: &str, dockerfile: &str, tag: &str, deadline: Deadline)
    -> Result<(), HostError>;

    /// Run an image
    ///
    /// # Errors
    ///
    /// Returns the host failure
    fn run(&self, image: &str, args: &[String], deadline: Deadline) -> Result<(), HostError>;

    /// Export a module from an image
    ///
    /// # Errors
    ///
    /// Returns the host failure
    fn module(&self, image: &str, path: &str, dest: &str, deadline: Deadline)
    -> Result<(), HostError>;
}

/// Metric and coverage consumer
pub trait TelemetryBackend: Send + Sync {
    /// Record a sample
    ///
    /// # Errors
    ///
    /// Returns the host failure
    fn metric(&self, name: &str, value: f64, tags: &[String]) -> Result<(), HostError>;

    /// Accept a coverage file
    ///
    /// # Errors
    ///
    /// Returns the host failure
    fn coverage(&self, format: &str, path: &Path) -> Result<(), HostError>;
}

/// Host backed by the local machine
#[derive(Clone)]
pub struct SystemHost {
    workdir: PathBuf,
    containers: Option<Arc<dyn ContainerBackend>>,
    telemetry: Option<Arc<dyn TelemetryBackend>>,
}

impl SystemHost {
    /// Host running commands in `workdir`
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            containers: None,
            telemetry: None,
        }
    }

    /// Provide container operations
    #[must_use]
    pub fn with_containers(mut self, backend: Arc<dyn ContainerBackend>) -> Self {
        self.containers = Some(backend);
        self
    }

    /// Provide metric and coverage reporting
    #[must_use]
    pub fn with_telemetry(mut self, backend: Arc<dyn TelemetryBackend>) -> Self {
        self.telemetry = Some(backend);
        self
    }

    /// Working directory for processes and relative paths
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn containers(&self) -> Result<&dyn ContainerBackend, HostError> {
        self.containers.as_deref().ok_or(HostError::NotImplemented)
    }

    fn telemetry(&self) -> Result<&dyn TelemetryBackend, HostError> {
        self.telemetry.as_deref().ok_or(HostError::NotImplemented)
    }
}

impl std::fmt::Debug for SystemHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemHost")
            .field("workdir", &self.workdir)
            .field("containers", &self.containers.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .finish()
    }
}

impl CapabilityHost for SystemHost {
    #[instrument(skip_all, fields(program = argv.first().map(String::as_str), deadline = deadline.as_raw()))]
    fn process_exec(&self, argv: &[String], deadline: Deadline) -> Result<(), HostError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HostError::failed(codes::INVALID_ARGUMENT, "empty argv"))?;
        if deadline.is_expired() {
            return Err(HostError::failed(codes::TIMED_OUT, "deadline passed before spawn"));
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        debug!("spawning child process");
        let child = cmd
            .spawn()
            .map_err(|e| HostError::failed(codes::SPAWN_FAILED, format!("spawn {program}: {e}")))?;
        let status = wait_with_deadline(child, deadline)?;
        exit_result(status)
    }

    #[instrument(skip(self, deadline), fields(deadline = deadline.as_raw()))]
    fn git_resolve_commit(&self, rev: &str, deadline: Deadline) -> Result<String, HostError> {
        if rev.is_empty() || rev.starts_with('-') {
            return Err(HostError::failed(codes::INVALID_ARGUMENT, "invalid revision"));
        }
        let mut child = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{rev}^{{commit}}"))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HostError::failed(codes::SPAWN_FAILED, format!("spawn git: {e}")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::failed(codes::FAILED, "stdout was not piped"))?;

        // A commit id is far below the pipe buffer, so waiting first cannot stall.
        let status = wait_with_deadline(child, deadline)?;
        exit_result(status)?;

        let mut out = String::new();
        stdout
            .read_to_string(&mut out)
            .map_err(|e| HostError::failed(codes::FAILED, format!("read git output: {e}")))?;
        let commit = out.trim().to_string();
        debug!(commit = %commit, "resolved revision");
        Ok(commit)
    }

    fn container_pull(&self, image: &str, deadline: Deadline) -> Result<(), HostError> {
        self.containers()?.pull(image, deadline)
    }

    fn container_build(
        &self,
        context: &str,
        dockerfile: &str,
        tag: &str,
        deadline: Deadline,
    ) -> Result<(), HostError> {
        self.containers()?.build(context, dockerfile, tag, deadline)
    }

    fn container_run(&self, image: &str, args: &[String], deadline: Deadline) -> Result<(), HostError> {
        self.containers()?.run(image, args, deadline)
    }

    fn container_module(
        &self,
        image: &str,
        path: &str,
        dest: &str,
        deadline: Deadline,
    ) -> Result<(), HostError> {
        self.containers()?.module(image, path, dest, deadline)
    }

    fn metric_record(
        &self,
        name: &str,
        value: f64,
        tags: &[String],
        _deadline: Deadline,
    ) -> Result<(), HostError> {
        self.telemetry()?.metric(name, value, tags)
    }

    fn coverage_report(&self, format: &str, path: &str, _deadline: Deadline) -> Result<(), HostError> {
        self.telemetry()?.coverage(format, &self.workdir.join(path))
    }
}

fn wait_with_deadline(mut child: Child, deadline: Deadline) -> Result<ExitStatus, HostError> {
    let waited = match deadline.remaining() {
        None => child.wait().map(Some),
        Some(timeout) => child.wait_timeout(timeout),
    };
    match waited {
        Ok(Some(status)) => Ok(status),
        Ok(None) => {
            warn!(deadline = deadline.as_raw(), "deadline passed, killing child");
            let _ = child.kill();
            let _ = child.wait();
            Err(HostError::failed(codes::TIMED_OUT, "deadline exceeded"))
        }
        Err(e) => Err(HostError::failed(codes::FAILED, format!("wait for child: {e}"))),
    }
}

fn exit_result(status: ExitStatus) -> Result<(), HostError> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => {
            debug!(code, "child exited with failure");
            Err(HostError::failed(code, format!("exit status {code}")))
        }
        None => Err(HostError::failed(codes::SIGNALLED, "terminated by signal")),
    }
}

/// Telemetry that turns samples into `Metric` and `Coverage` events
#[derive(Debug, Clone)]
pub struct EventTelemetry<S> {
    sink: S,
}

impl<S: EventSink> EventTelemetry<S> {
    /// Emit into `sink`
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// The sink receiving events
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: EventSink> TelemetryBackend for EventTelemetry<S> {
    fn metric(&self, name: &str, value: f64, tags: &[String]) -> Result<(), HostError> {
        if name.is_empty() {
            return Err(HostError::failed(codes::INVALID_ARGUMENT, "empty metric name"));
        }
        if !value.is_finite() {
            return Err(HostError::failed(
                codes::INVALID_ARGUMENT,
                format!("metric {name} is not finite"),
            ));
        }
        self.sink.emit(Message::new(Event::Metric(Metric {
            name: name.to_string(),
            value,
            tags: tags.to_vec(),
        })));
        Ok(())
    }

    fn coverage(&self, format: &str, path: &Path) -> Result<(), HostError> {
        if !path.is_file() {
            return Err(HostError::failed(
                codes::NOT_FOUND,
                format!("coverage file {} not found", path.display()),
            ));
        }
        self.sink.emit(Message::new(Event::Coverage(Coverage {
            format: format.to_string(),
            path: path.display().to_string(),
        })));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostAdapter;
    use crate::proxy::Guest;
    use kiln_log::MemorySink;
    use std::time::Duration;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn event_host(dir: &Path) -> (SystemHost, MemorySink) {
        let sink = MemorySink::new();
        let host = SystemHost::new(dir).with_telemetry(Arc::new(EventTelemetry::new(sink.clone())));
        (host, sink)
    }

    #[test]
    fn test_empty_argv_rejected() {
        let host = SystemHost::new(".");
        let err = host.process_exec(&[], Deadline::none()).unwrap_err();
        assert_eq!(err.status().as_raw(), codes::INVALID_ARGUMENT);
    }

    #[test]
    fn test_missing_program_is_spawn_failure() {
        let host = SystemHost::new(".");
        let err = host
            .process_exec(&argv(&["kiln-no-such-program-7f3a"]), Deadline::none())
            .unwrap_err();
        assert_eq!(err.status().as_raw(), codes::SPAWN_FAILED);
    }

    #[test]
    fn test_expired_deadline_is_not_spawned() {
        let host = SystemHost::new(".");
        let err = host
            .process_exec(&argv(&["true"]), Deadline::from_raw(1))
            .unwrap_err();
        assert_eq!(err.status().as_raw(), codes::TIMED_OUT);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_codes() {
        let host = SystemHost::new(".");
        host.process_exec(&argv(&["sh", "-c", "exit 0"]), Deadline::none())
            .unwrap();
        let err = host
            .process_exec(&argv(&["sh", "-c", "exit 3"]), Deadline::none())
            .unwrap_err();
        assert_eq!(err.status().as_raw(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_deadline_kills_child() {
        let host = SystemHost::new(".");
        let deadline = Deadline::after(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = host
            .process_exec(&argv(&["sleep", "5"]), deadline)
            .unwrap_err();
        assert_eq!(err.status().as_raw(), codes::TIMED_OUT);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let host = SystemHost::new(dir.path());
        host.process_exec(&argv(&["sh", "-c", "touch marker"]), Deadline::none())
            .unwrap();
        assert!(dir.path().join("marker").is_file());
    }

    #[test]
    fn test_git_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let host = SystemHost::new(dir.path());
        assert!(host.git_resolve_commit("HEAD", Deadline::none()).is_err());
        let err = host
            .git_resolve_commit("--output=x", Deadline::none())
            .unwrap_err();
        assert_eq!(err.status().as_raw(), codes::INVALID_ARGUMENT);
    }

    #[test]
    fn test_containers_absent_is_not_implemented() {
        let mut guest = Guest::new(HostAdapter::new(SystemHost::new(".")));
        let err = guest
            .container()
            .pull("alpine:3", Deadline::none())
            .unwrap_err();
        assert!(err.is_not_implemented());
        let err = guest
            .metrics()
            .record("x", 1.0, &[] as &[&str], Deadline::none())
            .unwrap_err();
        assert!(err.is_not_implemented());
    }

    #[test]
    fn test_metric_becomes_event() {
        let dir = tempfile::tempdir().unwrap();
        let (host, sink) = event_host(dir.path());
        let mut guest = Guest::new(HostAdapter::new(host));
        guest
            .metrics()
            .record("cache.hits", 12.0, &["crate=kiln_log"], Deadline::none())
            .unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        match messages[0].event() {
            Event::Metric(metric) => {
                assert_eq!(metric.name, "cache.hits");
                assert_eq!(metric.value, 12.0);
                assert_eq!(metric.tags, vec!["crate=kiln_log".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_metric_rejected() {
        let (host, sink) = event_host(Path::new("."));
        let err = host
            .metric_record("latency", f64::NAN, &[], Deadline::none())
            .unwrap_err();
        assert_eq!(err.status().as_raw(), codes::INVALID_ARGUMENT);
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn test_coverage_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let (host, sink) = event_host(dir.path());
        let err = host
            .coverage_report("lcov", "lcov.info", Deadline::none())
            .unwrap_err();
        assert_eq!(err.status().as_raw(), codes::NOT_FOUND);

        std::fs::write(dir.path().join("lcov.info"), b"TN:\nend_of_record\n").unwrap();
        host.coverage_report("lcov", "lcov.info", Deadline::none())
            .unwrap();
        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages[0].event(),
            Event::Coverage(c) if c.format == "lcov" && c.path.ends_with("lcov.info")
        ));
    }
}
