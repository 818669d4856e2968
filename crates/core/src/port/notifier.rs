// Notification side-channel port (mail formatting lives elsewhere)

use crate::domain::{Job, JobId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    JobCompleted,
    JobFatal,
}

impl NotificationKind {
    pub fn for_job(job: &Job) -> Self {
        if job.fatal_error {
            NotificationKind::JobFatal
        } else {
            NotificationKind::JobCompleted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::JobCompleted => "JOB_COMPLETED",
            NotificationKind::JobFatal => "JOB_FATAL",
        }
    }
}

#[async_trait]
pub trait JobNotifier: Send + Sync {
    /// Called once when a job reaches its completion time
    async fn job_completed(&self, job: &Job) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use std::sync::{Mutex, PoisonError};

    #[derive(Default)]
    pub struct RecordingNotifier {
        notified: Mutex<Vec<(JobId, NotificationKind)>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn notified(&self) -> Vec<(JobId, NotificationKind)> {
            self.notified
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl JobNotifier for RecordingNotifier {
        async fn job_completed(&self, job: &Job) -> Result<()> {
            self.notified
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((job.id, NotificationKind::for_job(job)));
            Ok(())
        }
    }
}
