//! Fleet data model: lifecycle states, discovered instances, tag filters.

use serde::{Deserialize, Serialize};

/// Provider-reported lifecycle state of a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    /// Anything the provider reports that we do not recognise.
    Unknown,
}

impl LifecycleState {
    /// Map a provider state name (`"running"`, `"shutting-down"`, ...) to a state.
    pub fn from_provider(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instance as observed during discovery. Owned by the provider; never cached
/// across loop iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub id: String,
    pub lifecycle_state: LifecycleState,
}

impl InstanceRef {
    pub fn new(id: impl Into<String>, lifecycle_state: LifecycleState) -> Self {
        Self {
            id: id.into(),
            lifecycle_state,
        }
    }
}

/// Provider-assigned grouping of instances returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub instances: Vec<InstanceRef>,
}

/// One row of a per-instance status fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub id: String,
    pub state: LifecycleState,
}

impl InstanceStatus {
    pub fn new(id: impl Into<String>, state: LifecycleState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }
}

/// Tag key/value pair selecting the managed instance group. Fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Filter name understood by the provider's describe call (`tag:<key>`).
    pub fn provider_filter_name(&self) -> String {
        format!("tag:{}", self.key)
    }
}

impl std::fmt::Display for TagFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Provider operations consumed by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    DescribeInstances,
    DescribeInstanceStatus,
    StopInstances,
    ModifyInstanceAttribute,
    StartInstances,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DescribeInstances => "DescribeInstances",
            Self::DescribeInstanceStatus => "DescribeInstanceStatus",
            Self::StopInstances => "StopInstances",
            Self::ModifyInstanceAttribute => "ModifyInstanceAttribute",
            Self::StartInstances => "StartInstances",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
