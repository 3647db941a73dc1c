use crate::defs::{
    ImageOptions, Job, JobError, JobId, JobInput, JobStatus, Opinion, PublishState, TextOrigin, Tone,
    VariantId, VariantStage, Verdict,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePostRequest {
    pub url: String,
    pub opinion: Opinion,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub image_options: ImageOptions,
}

impl From<CreatePostRequest> for JobInput {
    fn from(request: CreatePostRequest) -> Self {
        Self {
            url: request.url.trim().to_string(),
            opinion: request.opinion,
            tone: request.tone,
            image_options: request.image_options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePostResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegenerateTarget {
    Text,
    Image,
    Both,
}

impl RegenerateTarget {
    pub fn includes_text(&self) -> bool {
        matches!(self, RegenerateTarget::Text | RegenerateTarget::Both)
    }

    pub fn includes_image(&self) -> bool {
        matches!(self, RegenerateTarget::Image | RegenerateTarget::Both)
    }
}

impl fmt::Display for RegenerateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegenerateTarget::Text => "text",
            RegenerateTarget::Image => "image",
            RegenerateTarget::Both => "both",
        };
        f.write_str(name)
    }
}

impl FromStr for RegenerateTarget {
    type Err = crate::defs::ParseDefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(RegenerateTarget::Text),
            "image" => Ok(RegenerateTarget::Image),
            "both" => Ok(RegenerateTarget::Both),
            _ => Err(crate::defs::ParseDefError {
                kind: "regenerate target",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerateRequest {
    pub variant: VariantId,
    pub target: RegenerateTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditTextRequest {
    pub variant: VariantId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub variant: VariantId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub job_id: JobId,
    pub variant: VariantId,
    pub post_id: String,
    pub post_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageView {
    pub reference: String,
    pub mime_type: String,
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantView {
    pub id: VariantId,
    pub text: Option<String>,
    pub hashtags: Vec<String>,
    pub suggested_comment: Option<String>,
    pub alt_text: Option<String>,
    pub text_origin: Option<TextOrigin>,
    pub verdict: Verdict,
    pub image: Option<ImageView>,
    pub publish_state: PublishState,
    pub post_url: Option<String>,
    pub stage: VariantStage,
    pub last_error: Option<String>,
}

/// What a status poll returns. Built from a stored job without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub url: String,
    pub title: Option<String>,
    pub variants: Vec<VariantView>,
    pub moderation_warning: bool,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        let variants = job
            .variants
            .iter()
            .map(|variant| VariantView {
                id: variant.id,
                text: variant.text.as_ref().map(|text| text.body.clone()),
                hashtags: variant
                    .text
                    .as_ref()
                    .map(|text| text.hashtags.clone())
                    .unwrap_or_default(),
                suggested_comment: variant.text.as_ref().and_then(|text| text.suggested_comment.clone()),
                alt_text: variant.text.as_ref().and_then(|text| text.alt_text.clone()),
                text_origin: variant.text.as_ref().map(|text| text.origin),
                verdict: variant.verdict,
                image: variant.image.as_ref().map(|image| ImageView {
                    reference: image.reference.clone(),
                    mime_type: image.mime_type.clone(),
                    verdict: image.verdict,
                    created_at: image.created_at,
                }),
                publish_state: variant.publish_state,
                post_url: variant.post_url.clone(),
                stage: variant.stage,
                last_error: variant.last_error.as_ref().map(ToString::to_string),
            })
            .collect();

        Self {
            job_id: job.id,
            status: job.status,
            url: job.input.url.clone(),
            title: job.article.as_ref().map(|article| article.title.clone()),
            variants,
            moderation_warning: job.moderation_warning(),
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
