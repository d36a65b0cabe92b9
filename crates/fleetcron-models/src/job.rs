//! Job descriptor types shared by coordinator and workers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a job participates in a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobMode {
    /// The coordinator also pulls and executes worker tasks for this job.
    #[serde(default)]
    pub runs_coordinator_side_worker_tasks: bool,
    /// Only coordinator phases run; workers never ask for tasks.
    #[serde(default)]
    pub coordinator_only: bool,
    /// Only worker phases run; the coordinator skips prepare/finish.
    #[serde(default)]
    pub worker_only: bool,
}

impl JobMode {
    pub fn coordinator_only() -> Self {
        Self {
            coordinator_only: true,
            ..Self::default()
        }
    }

    pub fn worker_only() -> Self {
        Self {
            worker_only: true,
            ..Self::default()
        }
    }

    pub fn with_coordinator_worker(mut self, enabled: bool) -> Self {
        self.runs_coordinator_side_worker_tasks = enabled;
        self
    }
}

/// Role a node plays in the fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Coordinator,
    Worker,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Coordinator => "coordinator",
            NodeRole::Worker => "worker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "coordinator" | "name_server" => Some(NodeRole::Coordinator),
            "worker" => Some(NodeRole::Worker),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase, used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    CheckPrerequisites,
    Nondistributed,
    Prepare,
    Finish,
    GetTasks,
    DoTasks,
    PutTasks,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::CheckPrerequisites => "check_prerequisites",
            JobPhase::Nondistributed => "nondistributed",
            JobPhase::Prepare => "prepare",
            JobPhase::Finish => "finish",
            JobPhase::GetTasks => "get_tasks",
            JobPhase::DoTasks => "do_tasks",
            JobPhase::PutTasks => "put_tasks",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinator acknowledgement of a `put_tasks` report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Ack {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: Some(message.into()),
        }
    }
}
