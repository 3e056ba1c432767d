//! The guest/host calling convention.
//!
//! One method per capability. Arguments are primitives only: slices into
//! guest memory, string array tables, a metric value, and the absolute
//! deadline as unix milliseconds. Every method returns a raw status code.
//! Calls are synchronous; the guest blocks until the host returns.

use crate::marshal::StrArray;
use crate::memory::{GuestMemory, Slice};
use std::sync::Arc;

/// Host functions as seen from the guest
pub trait Boundary: Send + Sync {
    /// Run `argv` with the host's standard streams
    fn process_exec(&self, memory: &GuestMemory, argv: StrArray, deadline: u64) -> i32;

    /// Resolve `rev` and write the commit id into `out`, NUL padded
    fn git_resolve_commit(
        &self,
        memory: &mut GuestMemory,
        rev: Slice,
        out: Slice,
        deadline: u64,
    ) -> i32;

    /// Pull `image`
    fn container_pull(&self, memory: &GuestMemory, image: Slice, deadline: u64) -> i32;

    /// Build `context` with `dockerfile` and tag the result
    fn container_build(
        &self,
        memory: &GuestMemory,
        context: Slice,
        dockerfile: Slice,
        tag: Slice,
        deadline: u64,
    ) -> i32;

    /// Run `image` with `args`
    fn container_run(&self, memory: &GuestMemory, image: Slice, args: StrArray, deadline: u64)
    -> i32;

    /// Export the module at `path` inside `image` to host path `dest`
    fn container_module(
        &self,
        memory: &GuestMemory,
        image: Slice,
        path: Slice,
        dest: Slice,
        deadline: u64,
    ) -> i32;

    /// Record one metric sample
    fn metric_record(
        &self,
        memory: &GuestMemory,
        name: Slice,
        value: f64,
        tags: StrArray,
        deadline: u64,
    ) -> i32;

    /// Report the coverage file at `path` in `format`
    fn coverage_report(&self, memory: &GuestMemory, format: Slice, path: Slice, deadline: u64)
    -> i32;
}

impl<B: Boundary + ?Sized> Boundary for Arc<B> {
    fn process_exec(&self, memory: &GuestMemory, argv: StrArray, deadline: u64) -> i32 {
        (**self).process_exec(memory, argv, deadline)
    }

    fn git_resolve_commit(
        &self,
        memory: &mut GuestMemory,
        rev: Slice,
        out: Slice,
        deadline: u64,
    ) -> i32 {
        (**self).git_resolve_commit(memory, rev, out, deadline)
    }

    fn container_pull(&self, memory: &GuestMemory, image: Slice, deadline: u64) -> i32 {
        (**self).container_pull(memory, image, deadline)
    }

    fn container_build(
        &self,
        memory: &GuestMemory,
        context: Slice,
        dockerfile: Slice,
        tag: Slice,
        deadline: u64,
    ) -> i32 {
        (**self).container_build(memory, context, dockerfile, tag, deadline)
    }

    fn container_run(
        &self,
        memory: &GuestMemory,
        image: Slice,
        args: StrArray,
        deadline: u64,
    ) -> i32 {
        (**self).container_run(memory, image, args, deadline)
    }

    fn container_module(
        &self,
        memory: &GuestMemory,
        image: Slice,
        path: Slice,
        dest: Slice,
        deadline: u64,
    ) -> i32 {
        (**self).container_module(memory, image, path, dest, deadline)
    }

    fn metric_record(
        &self,
        memory: &GuestMemory,
        name: Slice,
        value: f64,
        tags: StrArray,
        deadline: u64,
    ) -> i32 {
        (**self).metric_record(memory, name, value, tags, deadline)
    }

    fn coverage_report(
        &self,
        memory: &GuestMemory,
        format: Slice,
        path: Slice,
        deadline: u64,
    ) -> i32 {
        (**self).coverage_report(memory, format, path, deadline)
    }
}
