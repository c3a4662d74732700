use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-job options supplied at creation time.
pub type JobMetadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Reference to a file owned by the document platform. Jobs never embed the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Kind of post-processing applied to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    MalwareScan,
    ThumbnailGeneration,
    DocumentConversion,
    MetadataExtraction,
    TextExtraction,
}

impl StageType {
    pub const ALL: [StageType; 5] = [
        StageType::MalwareScan,
        StageType::ThumbnailGeneration,
        StageType::DocumentConversion,
        StageType::MetadataExtraction,
        StageType::TextExtraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::MalwareScan => "malware_scan",
            StageType::ThumbnailGeneration => "thumbnail_generation",
            StageType::DocumentConversion => "document_conversion",
            StageType::MetadataExtraction => "metadata_extraction",
            StageType::TextExtraction => "text_extraction",
        }
    }

    /// Static priority table. Scanning gates trust, so it preempts cosmetic work;
    /// extraction is best-effort.
    pub fn priority(&self) -> Priority {
        match self {
            StageType::MalwareScan => Priority::Urgent,
            StageType::ThumbnailGeneration => Priority::High,
            StageType::DocumentConversion => Priority::Medium,
            StageType::MetadataExtraction => Priority::Low,
            StageType::TextExtraction => Priority::Low,
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "malware_scan" | "scan" => Ok(StageType::MalwareScan),
            "thumbnail_generation" | "thumbnail" | "thumbnails" => {
                Ok(StageType::ThumbnailGeneration)
            }
            "document_conversion" | "conversion" => Ok(StageType::DocumentConversion),
            "metadata_extraction" | "metadata" => Ok(StageType::MetadataExtraction),
            "text_extraction" | "text" => Ok(StageType::TextExtraction),
            other => Err(format!("Invalid stage type: {}", other)),
        }
    }
}

/// Priority class. Declaration order is the ordering: `Urgent` is the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A state change requested against a persisted job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Started {
        at: DateTime<Utc>,
    },
    Progress(u8),
    Completed {
        at: DateTime<Utc>,
        output: Option<serde_json::Value>,
    },
    Failed {
        at: DateTime<Utc>,
        message: String,
    },
    Cancelled {
        at: DateTime<Utc>,
    },
}

impl JobUpdate {
    fn target(&self) -> JobStatus {
        match self {
            JobUpdate::Started { .. } | JobUpdate::Progress(_) => JobStatus::Processing,
            JobUpdate::Completed { .. } => JobStatus::Completed,
            JobUpdate::Failed { .. } => JobStatus::Failed,
            JobUpdate::Cancelled { .. } => JobStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {id}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One unit of processing work for one stage of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub file_id: FileId,
    pub stage: StageType,
    pub priority: Priority,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub metadata: JobMetadata,
    pub created_by: String,
    pub output: Option<serde_json::Value>,
}

/// Read-only copy of a job as last persisted.
pub type JobSnapshot = Job;

impl Job {
    pub fn new(
        file_id: FileId,
        stage: StageType,
        priority: Priority,
        metadata: JobMetadata,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(),
            file_id,
            stage,
            priority,
            status: JobStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata,
            created_by: created_by.into(),
            output: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a state change, enforcing the job state machine.
    ///
    /// Progress is clamped to 100 and only ever raised; a lower value is
    /// accepted and ignored. Terminal jobs reject every update.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), TransitionError> {
        let allowed = matches!(
            (self.status, &update),
            (JobStatus::Pending, JobUpdate::Started { .. })
                | (JobStatus::Pending, JobUpdate::Cancelled { .. })
                | (JobStatus::Processing, JobUpdate::Progress(_))
                | (JobStatus::Processing, JobUpdate::Completed { .. })
                | (JobStatus::Processing, JobUpdate::Failed { .. })
                | (JobStatus::Processing, JobUpdate::Cancelled { .. })
        );
        if !allowed {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                to: update.target(),
            });
        }

        match update {
            JobUpdate::Started { at } => {
                self.status = JobStatus::Processing;
                self.started_at = Some(at);
                self.progress = 0;
            }
            JobUpdate::Progress(value) => {
                self.progress = self.progress.max(value.min(100));
            }
            JobUpdate::Completed { at, output } => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.completed_at = Some(at);
                self.output = output;
            }
            JobUpdate::Failed { at, message } => {
                self.status = JobStatus::Failed;
                self.completed_at = Some(at);
                self.error_message = Some(message);
            }
            JobUpdate::Cancelled { at } => {
                self.status = JobStatus::Cancelled;
                self.completed_at = Some(at);
            }
        }
        Ok(())
    }
}
