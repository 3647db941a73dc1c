pub use interfaces::defs::{
    ArticleContent, Capability, Image, ImageOptions, InvalidTransition, Job, JobError, JobId, JobInput,
    JobStatus, Opinion, PostText, PublishState, Summary, TextOrigin, Tone, Variant, VariantId, VariantStage,
    Verdict,
};
pub use interfaces::requests::{
    CreatePostRequest, CreatePostResponse, EditTextRequest, JobStatusView, PublishRequest, PublishResponse,
    RegenerateRequest, RegenerateTarget,
};

use crate::publisher::PublishError;

/// Selects jobs for listing. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            limit: None,
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |status| job.status == status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {id}")]
    NotFound { id: JobId },

    #[error("Job {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict { id: JobId, expected: u64, found: u64 },

    #[error("Job already exists: {id}")]
    AlreadyExists { id: JobId },

    #[error("Image not found: {reference}")]
    ImageNotFound { reference: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned synchronously by orchestrator operations. Stage failures
/// are never returned here; they are recorded on the job.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Job not found: {id}")]
    NotFound { id: JobId },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Store(StoreError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Timed out waiting for job {id} to settle")]
    Timeout { id: JobId },

    #[error("Pipeline worker has shut down")]
    Shutdown,
}

impl From<StoreError> for PipelineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { id } => PipelineError::NotFound { id },
            StoreError::Conflict { .. } => PipelineError::Conflict(error.to_string()),
            other => PipelineError::Store(other),
        }
    }
}

impl From<InvalidTransition> for PipelineError {
    fn from(error: InvalidTransition) -> Self {
        PipelineError::Conflict(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
