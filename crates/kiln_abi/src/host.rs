//! Host end of the boundary.
//!
//! [`CapabilityHost`] is the typed interface a host implements, one method
//! per capability. [`HostAdapter`] turns it into a [`Boundary`] by decoding
//! primitives out of guest memory and reducing the typed outcome to a status
//! code. Error text stays on the host side; only the code crosses.

use crate::boundary::Boundary;
use crate::capability::Capability;
use crate::marshal::{MarshalError, MarshalLimits, Status, StrArray, read_str, read_str_array};
use crate::memory::{GuestMemory, Slice};
use kiln_core::Deadline;
use tracing::{debug, error, warn};

/// Well-known host error codes
pub mod codes {
    /// Generic failure
    pub const FAILED: i32 = 1;
    /// Referenced file does not exist
    pub const NOT_FOUND: i32 = 2;
    /// Arguments could not be decoded
    pub const INVALID_ARGUMENT: i32 = 22;
    /// Result does not fit the caller's buffer
    pub const OUTPUT_TOO_LARGE: i32 = 75;
    /// Deadline passed before the work finished
    pub const TIMED_OUT: i32 = 124;
    /// Process could not be started
    pub const SPAWN_FAILED: i32 = 127;
    /// Process was terminated by a signal
    pub const SIGNALLED: i32 = 128;
}

/// Typed failure of a host operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The host does not provide the capability
    #[error("Capability not implemented")]
    NotImplemented,

    /// The guest must not retry or continue
    #[error("Unrecoverable: {reason}")]
    Unrecoverable {
        /// Host-side reason, never transmitted
        reason: String,
    },

    /// Operational failure with a code
    #[error("Failed with code {code}: {reason}")]
    Failed {
        /// Code sent to the guest
        code: i32,
        /// Host-side reason, never transmitted
        reason: String,
    },
}

impl HostError {
    /// Operational failure
    #[must_use]
    pub fn failed(code: i32, reason: impl Into<String>) -> Self {
        Self::Failed {
            code,
            reason: reason.into(),
        }
    }

    /// Unrecoverable failure
    #[must_use]
    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        Self::Unrecoverable {
            reason: reason.into(),
        }
    }

    /// Status code for the guest
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::NotImplemented => Status::NOT_IMPLEMENTED,
            Self::Unrecoverable { .. } => Status::UNRECOVERABLE,
            Self::Failed { code, .. } => Status::host_error(*code),
        }
    }
}

impl From<MarshalError> for HostError {
    fn from(err: MarshalError) -> Self {
        Self::failed(codes::INVALID_ARGUMENT, err.to_string())
    }
}

/// Typed host operations. Every method defaults to not-implemented so a
/// host only provides what its build supports.
#[allow(unused_variables)]
pub trait CapabilityHost: Send + Sync {
    /// Run a process with inherited standard streams
    fn process_exec(&self, argv: &[String], deadline: Deadline) -> Result<(), HostError> {
        Err(HostError::NotImplemented)
    }

    /// Resolve a revision to a commit id
    fn git_resolve_commit(&self, rev: &str, deadline: Deadline) -> Result<String, HostError> {
        Err(HostError::NotImplemented)
    }

    /// Pull an image
    fn container_pull(&self, image: &str, deadline: Deadline) -> Result<(), HostError> {
        Err(HostError::NotImplemented)
    }

    /// Build an image
    fn container_build(
        &self,
        context: &str,
        dockerfile: &str,
        tag: &str,
        deadline: Deadline,
    ) -> Result<(), HostError> {
        Err(HostError::NotImplemented)
    }

    /// Run an image
    fn container_run(&self, image: &str, args: &[String], deadline: Deadline) -> Result<(), HostError> {
        Err(HostError::NotImplemented)
    }

    /// Export a module from an image
    fn container_module(
        &self,
        image: &str,
        path: &str,
        dest: &str,
        deadline: Deadline,
    ) -> Result<(), HostError> {
        Err(HostError::NotImplemented)
    }

    /// Record a metric sample
    fn metric_record(
        &self,
        name: &str,
        value: f64,
        tags: &[String],
        deadline: Deadline,
    ) -> Result<(), HostError> {
        Err(HostError::NotImplemented)
    }

    /// Report a coverage file
    fn coverage_report(&self, format: &str, path: &str, deadline: Deadline) -> Result<(), HostError> {
        Err(HostError::NotImplemented)
    }
}

/// Adapts a [`CapabilityHost`] to the primitive [`Boundary`]
#[derive(Debug, Clone, Default)]
pub struct HostAdapter<H> {
    host: H,
    limits: MarshalLimits,
}

impl<H: CapabilityHost> HostAdapter<H> {
    /// Create an adapter with default limits
    #[must_use]
    pub fn new(host: H) -> Self {
        Self {
            host,
            limits: MarshalLimits::default(),
        }
    }

    /// Set marshalling limits
    #[must_use]
    pub fn with_limits(mut self, limits: MarshalLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The wrapped host
    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    fn dispatch<F>(&self, capability: Capability, deadline: u64, call: F) -> i32
    where
        F: FnOnce(Deadline) -> Result<(), HostError>,
    {
        let deadline = Deadline::from_raw(deadline);
        if deadline.is_expired() {
            // Still handed to the host; it decides what an expired deadline means.
            debug!(%capability, "call arrived with an expired deadline");
        }
        match call(deadline) {
            Ok(()) => Status::OK.as_raw(),
            Err(e) => {
                let status = e.status();
                match &e {
                    HostError::NotImplemented => debug!(%capability, "capability not provided"),
                    HostError::Unrecoverable { reason } => {
                        error!(%capability, reason = %reason, "unrecoverable host failure");
                    }
                    HostError::Failed { code, reason } => {
                        warn!(%capability, code, reason = %reason, "host operation failed");
                    }
                }
                status.as_raw()
            }
        }
    }

    fn str_arg(&self, memory: &GuestMemory, slice: Slice) -> Result<String, HostError> {
        Ok(read_str(memory, slice, &self.limits)?)
    }

    fn array_arg(&self, memory: &GuestMemory, array: StrArray) -> Result<Vec<String>, HostError> {
        Ok(read_str_array(memory, array, &self.limits)?)
    }
}

impl<H: CapabilityHost> Boundary for HostAdapter<H> {
    fn process_exec(&self, memory: &GuestMemory, argv: StrArray, deadline: u64) -> i32 {
        self.dispatch(Capability::ProcessExec, deadline, |deadline| {
            let argv = self.array_arg(memory, argv)?;
            self.host.process_exec(&argv, deadline)
        })
    }

    fn git_resolve_commit(
        &self,
        memory: &mut GuestMemory,
        rev: Slice,
        out: Slice,
        deadline: u64,
    ) -> i32 {
        self.dispatch(Capability::GitResolveCommit, deadline, |deadline| {
            let rev = self.str_arg(memory, rev)?;
            let commit = self.host.git_resolve_commit(&rev, deadline)?;
            memory
                .write(out, commit.as_bytes())
                .map_err(|e| HostError::failed(codes::OUTPUT_TOO_LARGE, e.to_string()))
        })
    }

    fn container_pull(&self, memory: &GuestMemory, image: Slice, deadline: u64) -> i32 {
        self.dispatch(Capability::ContainerPull, deadline, |deadline| {
            let image = self.str_arg(memory, image)?;
            self.host.container_pull(&image, deadline)
        })
    }

    fn container_build(
        &self,
        memory: &GuestMemory,
        context: Slice,
        dockerfile: Slice,
        tag: Slice,
        deadline: u64,
    ) -> i32 {
        self.dispatch(Capability::ContainerBuild, deadline, |deadline| {
            let context = self.str_arg(memory, context)?;
            let dockerfile = self.str_arg(memory, dockerfile)?;
            let tag = self.str_arg(memory, tag)?;
            self.host.container_build(&context, &dockerfile, &tag, deadline)
        })
    }

    fn container_run(
        &self,
        memory: &GuestMemory,
        image: Slice,
        args: StrArray,
        deadline: u64,
    ) -> i32 {
        self.dispatch(Capability::ContainerRun, deadline, |deadline| {
            let image = self.str_arg(memory, image)?;
            let args = self.array_arg(memory, args)?;
            self.host.container_run(&image, &args, deadline)
        })
    }

    fn container_module(
        &self,
        memory: &GuestMemory,
        image: Slice,
        path: Slice,
        dest: Slice,
        deadline: u64,
    ) -> i32 {
        self.dispatch(Capability::ContainerModule, deadline, |deadline| {
            let image = self.str_arg(memory, image)?;
            let path = self.str_arg(memory, path)?;
            let dest = self.str_arg(memory, dest)?;
            self.host.container_module(&image, &path, &dest, deadline)
        })
    }

    fn metric_record(
        &self,
        memory: &GuestMemory,
        name: Slice,
        value: f64,
        tags: StrArray,
        deadline: u64,
    ) -> i32 {
        self.dispatch(Capability::MetricRecord, deadline, |deadline| {
            let name = self.str_arg(memory, name)?;
            let tags = self.array_arg(memory, tags)?;
            self.host.metric_record(&name, value, &tags, deadline)
        })
    }

    fn coverage_report(
        &self,
        memory: &GuestMemory,
        format: Slice,
        path: Slice,
        deadline: u64,
    ) -> i32 {
        self.dispatch(Capability::CoverageReport, deadline, |deadline| {
            let format = self.str_arg(memory, format)?;
            let path = self.str_arg(memory, path)?;
            self.host.coverage_report(&format, &path, deadline)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityError;
    use crate::marshal::encode_bytes;
    use crate::proxy::{GIT_COMMIT_BUF_LEN, Guest};
    use std::sync::Mutex;

    /// Records every decoded call
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<String>, u64)>>,
    }

    impl Recorder {
        fn push(&self, name: &str, args: Vec<String>, deadline: Deadline) {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), args, deadline.as_raw()));
        }
    }

    impl CapabilityHost for Recorder {
        fn process_exec(&self, argv: &[String], deadline: Deadline) -> Result<(), HostError> {
            self.push("exec", argv.to_vec(), deadline);
            match argv.first().map(String::as_str) {
                Some("fail") => Err(HostError::failed(3, "exit 3")),
                Some("boom") => Err(HostError::unrecoverable("host is going away")),
                _ => Ok(()),
            }
        }

        fn git_resolve_commit(&self, rev: &str, deadline: Deadline) -> Result<String, HostError> {
            self.push("git", vec![rev.to_string()], deadline);
            match rev {
                "HEAD" => Ok("0123456789abcdef0123456789abcdef01234567".to_string()),
                "huge" => Ok("x".repeat(GIT_COMMIT_BUF_LEN + 1)),
                _ => Err(HostError::failed(codes::FAILED, "unknown revision")),
            }
        }

        fn container_build(
            &self,
            context: &str,
            dockerfile: &str,
            tag: &str,
            deadline: Deadline,
        ) -> Result<(), HostError> {
            self.push(
                "build",
                vec![context.into(), dockerfile.into(), tag.into()],
                deadline,
            );
            Ok(())
        }

        fn metric_record(
            &self,
            name: &str,
            value: f64,
            tags: &[String],
            deadline: Deadline,
        ) -> Result<(), HostError> {
            let mut args = vec![name.to_string(), value.to_string()];
            args.extend_from_slice(tags);
            self.push("metric", args, deadline);
            Ok(())
        }
    }

    fn guest() -> Guest<HostAdapter<Recorder>> {
        Guest::new(HostAdapter::new(Recorder::default()))
    }

    #[test]
    fn test_exec_roundtrip_arguments_and_deadline() {
        let adapter = std::sync::Arc::new(HostAdapter::new(Recorder::default()));
        let mut guest = Guest::new(adapter.clone());
        let deadline = Deadline::from_raw(1_000);
        guest
            .process()
            .exec(&["cargo", "test", "--", "żółw"], deadline)
            .unwrap();
        assert_eq!(guest.memory().used(), 0);

        let calls = adapter.host().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, vec!["cargo", "test", "--", "żółw"]);
        assert_eq!(calls[0].2, 1_000);
    }

    #[test]
    fn test_exec_statuses() {
        let mut guest = guest();
        let none = Deadline::none();
        assert!(matches!(
            guest.process().exec(&["fail"], none),
            Err(CapabilityError::Host { code: 3, .. })
        ));
        let fatal = guest.process().exec(&["boom"], none).unwrap_err();
        assert!(fatal.is_fatal());
    }

    #[test]
    fn test_not_implemented_is_distinct() {
        let mut guest = guest();
        let err = guest
            .container()
            .pull("alpine:3", Deadline::none())
            .unwrap_err();
        assert!(err.is_not_implemented());
        assert!(err.to_string().contains("capability unavailable in this environment"));
    }

    #[test]
    fn test_git_resolution_best_effort() {
        let mut guest = guest();
        assert_eq!(
            guest.git().resolve_commit("HEAD", Deadline::none()),
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert_eq!(guest.git().resolve_commit("nope", Deadline::none()), "");
        assert_eq!(guest.git().resolve_commit("huge", Deadline::none()), "");
        assert_eq!(guest.memory().used(), 0);
    }

    #[test]
    fn test_build_and_metric_arguments_reach_host() {
        let adapter = std::sync::Arc::new(HostAdapter::new(Recorder::default()));
        let mut guest = Guest::new(adapter.clone());
        guest
            .container()
            .build(".", "Dockerfile", "app:latest", Deadline::from_raw(5))
            .unwrap();
        guest
            .metrics()
            .record("build.seconds", 1.5, &["os=linux"], Deadline::none())
            .unwrap();

        let calls = adapter.host().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "build");
        assert_eq!(calls[0].1, vec![".", "Dockerfile", "app:latest"]);
        assert_eq!(calls[0].2, 5);
        assert_eq!(calls[1].1, vec!["build.seconds", "1.5", "os=linux"]);
        assert_eq!(calls[1].2, u64::MAX);
    }

    #[test]
    fn test_expired_deadline_still_transmitted() {
        let adapter = std::sync::Arc::new(HostAdapter::new(Recorder::default()));
        let mut guest = Guest::new(adapter.clone());
        guest.process().exec(&["true"], Deadline::from_raw(1)).unwrap();
        let calls = adapter.host().calls.lock().unwrap().clone();
        assert_eq!(calls[0].2, 1);
    }

    #[test]
    fn test_malformed_utf8_is_ordinary_error() {
        let adapter = HostAdapter::new(Recorder::default());
        let limits = MarshalLimits::default();
        let mut memory = GuestMemory::default();
        let mut frame = memory.frame();
        let image = encode_bytes(&mut frame, &[0xc3, 0x28], &limits).unwrap();
        let raw = adapter.container_pull(frame.memory(), image, Deadline::NONE_RAW);
        assert_eq!(raw, codes::INVALID_ARGUMENT);
    }

    #[test]
    fn test_out_of_bounds_slice_is_ordinary_error() {
        let adapter = HostAdapter::new(Recorder::default());
        let memory = GuestMemory::default();
        let raw = adapter.container_pull(&memory, Slice::new(10, 10), Deadline::NONE_RAW);
        assert_eq!(raw, codes::INVALID_ARGUMENT);
    }

    #[test]
    fn test_host_error_status() {
        assert_eq!(HostError::NotImplemented.status(), Status::NOT_IMPLEMENTED);
        assert_eq!(HostError::unrecoverable("x").status(), Status::UNRECOVERABLE);
        assert_eq!(HostError::failed(0, "x").status(), Status::from_raw(1));
        assert_eq!(HostError::failed(9, "x").status(), Status::from_raw(9));
    }
}
