//! Job lifecycle notifications.
//!
//! Lossy broadcast: slow subscribers miss events, publishers never block.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use pressroom_core::{JobId, JobStatus, StageName, StageStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Started {
        job_id: JobId,
        at: DateTime<Utc>,
    },
    StageFinished {
        job_id: JobId,
        stage: StageName,
        status: StageStatus,
        at: DateTime<Utc>,
    },
    Finished {
        job_id: JobId,
        status: JobStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Started { job_id, .. }
            | JobEvent::StageFinished { job_id, .. }
            | JobEvent::Finished { job_id, .. } => *job_id,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            JobEvent::Started { .. } => "job.started",
            JobEvent::StageFinished { .. } => "job.stage_finished",
            JobEvent::Finished { .. } => "job.finished",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let job_id = JobId::new();

        bus.publish(JobEvent::Started {
            job_id,
            at: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id(), job_id);
        assert_eq!(event.topic(), "job.started");
    }

    #[test]
    fn publishing_without_subscribers_does_not_fail() {
        let bus = EventBus::new(1);
        bus.publish(JobEvent::Finished {
            job_id: JobId::new(),
            status: JobStatus::Completed,
            reason: None,
            at: Utc::now(),
        });
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = JobEvent::StageFinished {
            job_id: JobId::new(),
            stage: StageName::QualityGate,
            status: StageStatus::Partial,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stage_finished");
        assert_eq!(json["stage"], "quality_gate");
        assert_eq!(json["status"], "partial");
    }
}
