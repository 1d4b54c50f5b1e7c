//! `InstantiationTask` (§3, §4.6): the user-visible record of one
//! create-environment request as it moves through the worker pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage progression is `Initializing -> ReadingTemplates -> CreatingObjects
/// -> Complete`, or any stage `-> Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStage {
    Initializing,
    ReadingTemplates,
    CreatingObjects,
    Complete,
    Error,
}

impl TaskStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStage::Complete | TaskStage::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantiationTask {
    pub request_id: String,
    pub template_id: String,
    pub user_id: String,
    pub stage: TaskStage,
    /// Monotonically non-decreasing within a non-error run, bounded by 100.
    pub percentage: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Environment id assigned once `CreatingObjects` creates the exchange;
    /// populated at `Complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<u64>,
}

impl InstantiationTask {
    pub fn new(request_id: String, template_id: String, user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            request_id,
            template_id,
            user_id,
            stage: TaskStage::Initializing,
            percentage: 0,
            message: "initializing".to_string(),
            details: None,
            started_at: now,
            completed_at: None,
            error: None,
            environment_id: None,
        }
    }

    pub(super) fn advance(&mut self, stage: TaskStage, percentage: u8, message: impl Into<String>) {
        self.stage = stage;
        self.percentage = self.percentage.max(percentage);
        self.message = message.into();
    }

    pub(super) fn fail(&mut self, cause: impl Into<String>, now: DateTime<Utc>) {
        self.stage = TaskStage::Error;
        self.message = "failed".to_string();
        self.error = Some(cause.into());
        self.completed_at = Some(now);
    }

    pub(super) fn complete(&mut self, environment_id: u64, now: DateTime<Utc>) {
        self.stage = TaskStage::Complete;
        self.percentage = 100;
        self.message = "complete".to_string();
        self.environment_id = Some(environment_id);
        self.completed_at = Some(now);
    }
}
