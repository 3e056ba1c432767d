//! Guest-side capability proxies.
//!
//! Each proxy takes typed arguments, marshals them into a call frame,
//! invokes its boundary method and translates the status. Proxies keep no
//! state of their own; the frame is released as soon as the call returns.

use crate::boundary::Boundary;
use crate::capability::{Capability, CapabilityError};
use crate::marshal::{
    MarshalError, MarshalLimits, Status, encode_str, encode_str_array, read_padded_str,
};
use crate::memory::{CallFrame, GuestMemory, MemoryLimit};
use kiln_core::Deadline;
use tracing::{debug, error, warn};

/// Size of the output buffer a commit id is written into
pub const GIT_COMMIT_BUF_LEN: usize = 64;

/// Guest end of the boundary
pub struct Guest<B> {
    boundary: B,
    memory: GuestMemory,
    limits: MarshalLimits,
}

impl<B: Boundary> Guest<B> {
    /// Create a guest with default memory and limits
    #[must_use]
    pub fn new(boundary: B) -> Self {
        Self {
            boundary,
            memory: GuestMemory::default(),
            limits: MarshalLimits::default(),
        }
    }

    /// Set the memory limit
    #[must_use]
    pub fn with_memory_limit(mut self, limit: MemoryLimit) -> Self {
        self.memory = GuestMemory::new(limit);
        self
    }

    /// Set marshalling limits
    #[must_use]
    pub fn with_limits(mut self, limits: MarshalLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Guest memory
    #[must_use]
    pub fn memory(&self) -> &GuestMemory {
        &self.memory
    }

    /// Process execution proxy
    pub fn process(&mut self) -> Process<'_, B> {
        Process { guest: self }
    }

    /// Git proxy
    pub fn git(&mut self) -> Git<'_, B> {
        Git { guest: self }
    }

    /// Container proxy
    pub fn container(&mut self) -> Container<'_, B> {
        Container { guest: self }
    }

    /// Metric proxy
    pub fn metrics(&mut self) -> Metrics<'_, B> {
        Metrics { guest: self }
    }

    /// Coverage proxy
    pub fn coverage(&mut self) -> Coverage<'_, B> {
        Coverage { guest: self }
    }

    fn invoke<F>(&mut self, capability: Capability, call: F) -> Result<(), CapabilityError>
    where
        F: FnOnce(&B, &mut CallFrame<'_>, &MarshalLimits) -> Result<i32, MarshalError>,
    {
        let mut frame = self.memory.frame();
        let raw = call(&self.boundary, &mut frame, &self.limits)?;
        drop(frame);
        classify(capability, raw)
    }
}

fn classify(capability: Capability, raw: i32) -> Result<(), CapabilityError> {
    let result = Status::from_raw(raw).into_result(capability);
    match &result {
        Ok(()) => debug!(%capability, "capability call succeeded"),
        Err(e) if e.is_fatal() => error!(%capability, "host reported unrecoverable failure"),
        Err(e) => debug!(%capability, error = %e, "capability call failed"),
    }
    result
}

/// Process execution
pub struct Process<'g, B> {
    guest: &'g mut Guest<B>,
}

impl<B: Boundary> Process<'_, B> {
    /// Run `argv` on the host. The host's standard streams are inherited,
    /// nothing is buffered.
    ///
    /// # Errors
    ///
    /// Returns the classified host status or a marshalling error
    pub fn exec<S: AsRef<str>>(
        &mut self,
        argv: &[S],
        deadline: Deadline,
    ) -> Result<(), CapabilityError> {
        self.guest
            .invoke(Capability::ProcessExec, |boundary, frame, limits| {
                let argv = encode_str_array(frame, argv, limits)?;
                Ok(boundary.process_exec(frame.memory(), argv, deadline.as_raw()))
            })
    }
}

/// Git commit resolution
pub struct Git<'g, B> {
    guest: &'g mut Guest<B>,
}

impl<B: Boundary> Git<'_, B> {
    /// Resolve `rev` to a commit id.
    ///
    /// Best effort: any failure is logged and yields an empty string.
    pub fn resolve_commit(&mut self, rev: &str, deadline: Deadline) -> String {
        match self.try_resolve_commit(rev, deadline) {
            Ok(commit) => commit,
            Err(e) => {
                warn!(rev, error = %e, "git commit resolution failed");
                String::new()
            }
        }
    }

    fn try_resolve_commit(&mut self, rev: &str, deadline: Deadline) -> Result<String, CapabilityError> {
        let guest = &mut *self.guest;
        let mut frame = guest.memory.frame();
        let rev = encode_str(&mut frame, rev, &guest.limits)?;
        let out = frame.alloc_zeroed(GIT_COMMIT_BUF_LEN)?;
        let raw = guest
            .boundary
            .git_resolve_commit(frame.memory_mut(), rev, out, deadline.as_raw());
        classify(Capability::GitResolveCommit, raw)?;
        Ok(read_padded_str(frame.memory(), out)?)
    }
}

/// Container lifecycle. Every operation is fire-and-forget: one status comes
/// back, no progress.
pub struct Container<'g, B> {
    guest: &'g mut Guest<B>,
}

impl<B: Boundary> Container<'_, B> {
    /// Pull an image
    ///
    /// # Errors
    ///
    /// Returns the classified host status or a marshalling error
    pub fn pull(&mut self, image: &str, deadline: Deadline) -> Result<(), CapabilityError> {
        self.guest
            .invoke(Capability::ContainerPull, |boundary, frame, limits| {
                let image = encode_str(frame, image, limits)?;
                Ok(boundary.container_pull(frame.memory(), image, deadline.as_raw()))
            })
    }

    /// Build an image from a context directory
    ///
    /// # Errors
    ///
    /// Returns the classified host status or a marshalling error
    pub fn build(
        &mut self,
        context: &str,
        dockerfile: &str,
        tag: &str,
        deadline: Deadline,
    ) -> Result<(), CapabilityError> {
        self.guest
            .invoke(Capability::ContainerBuild, |boundary, frame, limits| {
                let context = encode_str(frame, context, limits)?;
                let dockerfile = encode_str(frame, dockerfile, limits)?;
                let tag = encode_str(frame, tag, limits)?;
                Ok(boundary.container_build(
                    frame.memory(),
                    context,
                    dockerfile,
                    tag,
                    deadline.as_raw(),
                ))
            })
    }

    /// Run an image
    ///
    /// # Errors
    ///
    /// Returns the classified host status or a marshalling error
    pub fn run<S: AsRef<str>>(
        &mut self,
        image: &str,
        args: &[S],
        deadline: Deadline,
    ) -> Result<(), CapabilityError> {
        self.guest
            .invoke(Capability::ContainerRun, |boundary, frame, limits| {
                let image = encode_str(frame, image, limits)?;
                let args = encode_str_array(frame, args, limits)?;
                Ok(boundary.container_run(frame.memory(), image, args, deadline.as_raw()))
            })
    }

    /// Export a module from an image to a host path
    ///
    /// # Errors
    ///
    /// Returns the classified host status or a marshalling error
    pub fn module(
        &mut self,
        image: &str,
        path: &str,
        dest: &str,
        deadline: Deadline,
    ) -> Result<(), CapabilityError> {
        self.guest
            .invoke(Capability::ContainerModule, |boundary, frame, limits| {
                let image = encode_str(frame, image, limits)?;
                let path = encode_str(frame, path, limits)?;
                let dest = encode_str(frame, dest, limits)?;
                Ok(boundary.container_module(frame.memory(), image, path, dest, deadline.as_raw()))
            })
    }
}

/// Metric recording
pub struct Metrics<'g, B> {
    guest: &'g mut Guest<B>,
}

impl<B: Boundary> Metrics<'_, B> {
    /// Record one sample
    ///
    /// # Errors
    ///
    /// Returns the classified host status or a marshalling error
    pub fn record<S: AsRef<str>>(
        &mut self,
        name: &str,
        value: f64,
        tags: &[S],
        deadline: Deadline,
    ) -> Result<(), CapabilityError> {
        self.guest
            .invoke(Capability::MetricRecord, |boundary, frame, limits| {
                let name = encode_str(frame, name, limits)?;
                let tags = encode_str_array(frame, tags, limits)?;
                Ok(boundary.metric_record(frame.memory(), name, value, tags, deadline.as_raw()))
            })
    }
}

/// Coverage reporting
pub struct Coverage<'g, B> {
    guest: &'g mut Guest<B>,
}

impl<B: Boundary> Coverage<'_, B> {
    /// Report a coverage file
    ///
    /// # Errors
    ///
    /// Returns the classified host status or a marshalling error
    pub fn report(
        &mut self,
        format: &str,
        path: &str,
        deadline: Deadline,
    ) -> Result<(), CapabilityError> {
        self.guest
            .invoke(Capability::CoverageReport, |boundary, frame, limits| {
                let format = encode_str(frame, format, limits)?;
                let path = encode_str(frame, path, limits)?;
                Ok(boundary.coverage_report(frame.memory(), format, path, deadline.as_raw()))
            })
    }
}
