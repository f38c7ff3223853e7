use serde::{Deserialize, Serialize};

use crate::model::{Experiment, Id, Note, Sample};

/// Everything needed to commit one design to the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationBatch {
    pub space: String,
    pub project: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Alternative project title
    #[serde(default)]
    pub secondary_name: Option<String>,
    pub user: String,
    pub experiments: Vec<Experiment>,
    /// Sample tiers in parent-before-child order
    pub tiers: Vec<Vec<Sample>>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub people: ProjectPeople,
}

impl RegistrationBatch {
    pub fn total_samples(&self) -> usize {
        self.tiers.iter().map(Vec::len).sum()
    }
}

/// Person-store ids attached to a new project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPeople {
    pub investigator: Option<i32>,
    pub contact: Option<i32>,
    pub manager: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Project,
    Experiment,
    Sample,
    /// Post-registration check that the project became visible
    Visibility,
}

/// One rejected or failed registry item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: ItemKind,
    pub code: String,
    /// Index of the sample tier, if the failure belongs to one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<usize>,
    pub message: String,
}

/// Per-item result reported by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn ok(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            error: None,
        }
    }

    pub fn failed(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a batch registration, handed to the completion callback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReport {
    pub project: String,
    pub errors: Vec<ItemFailure>,
    /// Tier indices whose every sample was accepted
    pub committed_tiers: Vec<usize>,
    /// Tier indices that were submitted at all
    pub attempted_tiers: Vec<usize>,
    pub registered_samples: usize,
    pub total_samples: usize,
    pub cancelled: bool,
    /// Person/project metadata could not be written
    pub person_store_unavailable: bool,
    pub summary: String,
}

impl RegistrationReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Snapshot of a background registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationJob {
    pub id: Id,
    pub project: String,
    pub state: JobState,
    pub done: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RegistrationReport>,
    pub started_at: String,
}
