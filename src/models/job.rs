use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::models::target::TargetRef;

/// Status of an image-generation job.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed moves: pending -> processing -> {completed, failed}.
    ///
    /// `processing -> processing` is a reclaim of a stale claim.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// Parameters for a job about to be enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewJob {
    pub target: Option<TargetRef>,
    pub prompt: String,
    pub style_preset: Option<String>,
    pub negative_prompt: Option<String>,
    pub priority: i32,
}

impl NewJob {
    pub fn for_prompt(prompt: impl Into<String>) -> Self {
        Self {
            target: None,
            prompt: prompt.into(),
            style_preset: None,
            negative_prompt: None,
            priority: 0,
        }
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Human-readable subject used in duplicate errors.
    pub fn subject(&self) -> String {
        match self.target {
            Some(target) => format!("target {target}"),
            None => format!("prompt '{}'", self.prompt.chars().take(40).collect::<String>()),
        }
    }

    /// True when `job` is unresolved and covers the same subject.
    ///
    /// Targeted jobs match on the target; free-prompt jobs match on the prompt.
    pub fn is_covered_by(&self, job: &ImageJob) -> bool {
        if job.status.is_terminal() {
            return false;
        }
        match (&self.target, &job.target) {
            (Some(ours), Some(theirs)) => ours == theirs,
            (None, None) => self.prompt == job.prompt,
            _ => false,
        }
    }
}

/// One image-generation job row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageJob {
    pub id: Uuid,
    pub target: Option<TargetRef>,
    pub prompt: String,
    pub style_preset: Option<String>,
    pub negative_prompt: Option<String>,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: i32,
    pub provider: Option<String>,
    pub cost: Option<f64>,
    pub image_url: Option<String>,
    pub error: Option<String>,
    pub retry_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome recorded when a job completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub image_url: String,
    pub provider: String,
    pub cost: f64,
}

/// Job counts keyed by status. Every status is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts(pub BTreeMap<JobStatus, i64>);

impl StatusCounts {
    pub fn zeroed() -> Self {
        use strum::IntoEnumIterator;
        Self(JobStatus::iter().map(|s| (s, 0)).collect())
    }

    pub fn get(&self, status: JobStatus) -> i64 {
        self.0.get(&status).copied().unwrap_or(0)
    }

    pub fn add(&mut self, status: JobStatus, count: i64) {
        *self.0.entry(status).or_insert(0) += count;
    }

    pub fn total(&self) -> i64 {
        self.0.values().sum()
    }
}

/// Recorded spend for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpend {
    pub provider: String,
    pub completed: i64,
    pub total_cost: f64,
}
