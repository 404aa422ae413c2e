//! Live progress events pushed to clients watching a job.
//!
//! Every job produces a `started` event, one `progress` event per completed
//! stage, and exactly one terminal event (`completed`, `failed` or
//! `cancelled`). Keepalives are transport frames, not events.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Job moved from pending to running.
pub const MSG_TYPE_JOB_STARTED: &str = "started";

/// A stage finished and progress advanced.
pub const MSG_TYPE_JOB_PROGRESS: &str = "progress";

/// Job completed successfully; carries the result reference.
pub const MSG_TYPE_JOB_COMPLETED: &str = "completed";

/// Job failed; carries the error message.
pub const MSG_TYPE_JOB_FAILED: &str = "failed";

/// Job was cancelled by its owner.
pub const MSG_TYPE_JOB_CANCELLED: &str = "cancelled";

/// Discriminant of a [`JobEvent`], serialized as the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventType {
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
}

impl JobEventType {
    /// Wire name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => MSG_TYPE_JOB_STARTED,
            Self::Progress => MSG_TYPE_JOB_PROGRESS,
            Self::Completed => MSG_TYPE_JOB_COMPLETED,
            Self::Failed => MSG_TYPE_JOB_FAILED,
            Self::Cancelled => MSG_TYPE_JOB_CANCELLED,
        }
    }

    /// Terminal events end the stream for a job.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A single event on a job's live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub event_type: JobEventType,
    pub job_id: JobId,
    pub progress_percentage: i16,
    pub current_stage: Option<String>,
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: Timestamp,
}

impl JobEvent {
    fn new(event_type: JobEventType, job_id: JobId, progress_percentage: i16) -> Self {
        Self {
            event_type,
            job_id,
            progress_percentage,
            current_stage: None,
            message: None,
            result: None,
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn started(job_id: JobId) -> Self {
        Self::new(JobEventType::Started, job_id, 0).with_message("Job started")
    }

    pub fn progress(
        job_id: JobId,
        progress_percentage: i16,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(JobEventType::Progress, job_id, progress_percentage);
        event.current_stage = Some(stage.into());
        event.message = Some(message.into());
        event
    }

    pub fn completed(job_id: JobId, result: serde_json::Value) -> Self {
        let mut event = Self::new(JobEventType::Completed, job_id, 100);
        event.result = Some(result);
        event.with_message("Job completed")
    }

    pub fn failed(job_id: JobId, progress_percentage: i16, error: impl Into<String>) -> Self {
        let mut event = Self::new(JobEventType::Failed, job_id, progress_percentage);
        event.error = Some(error.into());
        event.with_message("Job failed")
    }

    pub fn cancelled(job_id: JobId, progress_percentage: i16) -> Self {
        Self::new(JobEventType::Cancelled, job_id, progress_percentage)
            .with_message("Job cancelled")
    }

    /// Attach the stage that was current when the event was produced.
    pub fn with_stage(mut self, stage: Option<String>) -> Self {
        self.current_stage = stage;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_serializes_type_field() {
        let id = uuid::Uuid::nil();
        let event = JobEvent::progress(id, 25, "outline", "Outline drafted");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "progress");
        assert_eq!(json["progress_percentage"], 25);
        assert_eq!(json["current_stage"], "outline");
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn terminal_events_carry_result_or_error() {
        let id = uuid::Uuid::nil();

        let done = JobEvent::completed(id, serde_json::json!({"project_id": "p"}));
        assert!(done.is_terminal());
        assert_eq!(done.progress_percentage, 100);
        assert_eq!(done.result.as_ref().unwrap()["project_id"], "p");

        let failed = JobEvent::failed(id, 40, "boom");
        assert!(failed.is_terminal());
        assert_eq!(failed.error.as_deref(), Some("boom"));

        assert!(!JobEvent::started(id).is_terminal());
    }

    #[test]
    fn type_names_match_constants() {
        assert_eq!(JobEventType::Cancelled.as_str(), MSG_TYPE_JOB_CANCELLED);
        let json = serde_json::to_string(&JobEventType::Started).unwrap();
        assert_eq!(json, format!("\"{MSG_TYPE_JOB_STARTED}\""));
    }
}
