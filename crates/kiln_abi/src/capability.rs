//! The privileged operations a guest can request from the host.

use crate::marshal::MarshalError;
use serde::{Deserialize, Serialize};

/// A capability is one privileged operation exposed through the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Run a process with the host's standard streams
    ProcessExec,
    /// Resolve a git revision to a commit id
    GitResolveCommit,
    /// Pull a container image
    ContainerPull,
    /// Build a container image
    ContainerBuild,
    /// Run a container
    ContainerRun,
    /// Export a sandboxed module from a container image
    ContainerModule,
    /// Record a metric sample
    MetricRecord,
    /// Report a coverage file
    CoverageReport,
}

impl Capability {
    /// Every capability, in boundary order
    pub const ALL: [Capability; 8] = [
        Self::ProcessExec,
        Self::GitResolveCommit,
        Self::ContainerPull,
        Self::ContainerBuild,
        Self::ContainerRun,
        Self::ContainerModule,
        Self::MetricRecord,
        Self::CoverageReport,
    ];

    /// Boundary name of the capability
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProcessExec => "process_exec",
            Self::GitResolveCommit => "git_resolve_commit",
            Self::ContainerPull => "container_pull",
            Self::ContainerBuild => "container_build",
            Self::ContainerRun => "container_run",
            Self::ContainerModule => "container_module",
            Self::MetricRecord => "metric_record",
            Self::CoverageReport => "coverage_report",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors seen by guest code after a capability call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// The host build does not provide this capability
    #[error("{capability}: capability unavailable in this environment")]
    NotImplemented {
        /// Capability that was requested
        capability: Capability,
    },

    /// The host says the guest must not retry or continue
    #[error("{capability}: unrecoverable host failure")]
    Unrecoverable {
        /// Capability that was requested
        capability: Capability,
    },

    /// Opaque host failure; text is not transmitted
    #[error("{capability}: host error code {code}")]
    Host {
        /// Capability that was requested
        capability: Capability,
        /// Host status code
        code: i32,
    },

    /// Arguments could not be marshalled
    #[error("Marshalling failed: {0}")]
    Marshal(#[from] MarshalError),
}

impl CapabilityError {
    /// Whether the run must abort
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unrecoverable { .. })
    }

    /// Whether the capability is missing rather than failing
    #[must_use]
    pub const fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }

    /// Host status code, if the host produced one
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Host { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_unique() {
        let mut names: Vec<&str> = Capability::ALL.iter().map(Capability::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Capability::ALL.len());
    }

    #[test]
    fn test_not_implemented_message() {
        let err = CapabilityError::NotImplemented {
            capability: Capability::ContainerBuild,
        };
        assert_eq!(
            err.to_string(),
            "container_build: capability unavailable in this environment"
        );
        assert!(err.is_not_implemented());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_classification() {
        let fatal = CapabilityError::Unrecoverable {
            capability: Capability::ProcessExec,
        };
        assert!(fatal.is_fatal());
        assert_eq!(fatal.code(), None);

        let host = CapabilityError::Host {
            capability: Capability::ProcessExec,
            code: 2,
        };
        assert!(!host.is_fatal());
        assert_eq!(host.code(), Some(2));
    }
}
