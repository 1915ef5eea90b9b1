//! Types for the pod directory crate.

use std::fmt;

use k8s_openapi::api::core::v1::Pod;

/// Phase of the pod lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PodPhase {
    /// Pod has been accepted but containers are not yet running.
    Pending,
    /// Pod is running with at least one container.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container failed.
    Failed,
    /// Pod status cannot be determined.
    #[default]
    Unknown,
}

impl PodPhase {
    /// Parse a pod phase from a Kubernetes phase string.
    #[must_use]
    pub fn from_k8s_phase(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Whether a pod in this phase counts as a ready replacement.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// The Kubernetes spelling of this phase.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The view of a pod the replacer works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    /// Pod name, unique within its namespace.
    pub name: String,
    /// Current lifecycle phase.
    pub phase: PodPhase,
}

impl PodSummary {
    /// Create a summary from a name and phase.
    #[must_use]
    pub fn new(name: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            name: name.into(),
            phase,
        }
    }

    /// Summarize a Kubernetes pod. Returns `None` for pods without a name.
    #[must_use]
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let name = pod.metadata.name.clone()?;
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(PodPhase::from_k8s_phase)
            .unwrap_or_default();

        Some(Self { name, phase })
    }
}

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The API server accepted the deletion.
    Deleted,
    /// The pod did not exist any more.
    AlreadyGone,
}
