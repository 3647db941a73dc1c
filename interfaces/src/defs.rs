use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type JobId = Uuid;

/// Returned when a string does not name a known value of one of the enums below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseDefError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseDefError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Scraping,
    Summarizing,
    GeneratingText,
    GeneratingImages,
    Moderating,
    Ready,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// The stages a job walks through between PENDING and READY, in order.
    pub const STAGES: [JobStatus; 5] = [
        JobStatus::Scraping,
        JobStatus::Summarizing,
        JobStatus::GeneratingText,
        JobStatus::GeneratingImages,
        JobStatus::Moderating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Scraping => "SCRAPING",
            JobStatus::Summarizing => "SUMMARIZING",
            JobStatus::GeneratingText => "GENERATING_TEXT",
            JobStatus::GeneratingImages => "GENERATING_IMAGES",
            JobStatus::Moderating => "MODERATING",
            JobStatus::Ready => "READY",
            JobStatus::Publishing => "PUBLISHING",
            JobStatus::Published => "PUBLISHED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// READY counts as terminal for the generation pipeline; only an explicit
    /// publish request moves a job past it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Ready | JobStatus::Published | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_running(&self) -> bool {
        Self::STAGES.contains(self)
    }

    pub fn is_cancellable(&self) -> bool {
        *self == JobStatus::Pending || self.is_running()
    }

    fn stage_index(&self) -> Option<usize> {
        Self::STAGES.iter().position(|stage| stage == self)
    }

    /// Whether `next` is an edge of the job state machine starting at `self`.
    /// Re-entering the current running stage is allowed so that an interrupted
    /// stage can be resumed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Pending, Scraping) => true,
            (Pending | Scraping | Summarizing | GeneratingText | GeneratingImages | Moderating, Failed | Cancelled) => true,
            (Moderating, Ready) => true,
            (Ready, Publishing) => true,
            (Publishing, Published | Ready) => true,
            (current, next) if current.is_running() && next.is_running() => {
                match (current.stage_index(), next.stage_index()) {
                    (Some(from), Some(to)) => to == from || to == from + 1,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseDefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        let status = match normalized.as_str() {
            "PENDING" => JobStatus::Pending,
            "SCRAPING" => JobStatus::Scraping,
            "SUMMARIZING" => JobStatus::Summarizing,
            "GENERATING_TEXT" => JobStatus::GeneratingText,
            "GENERATING_IMAGES" => JobStatus::GeneratingImages,
            "MODERATING" => JobStatus::Moderating,
            "READY" => JobStatus::Ready,
            "PUBLISHING" => JobStatus::Publishing,
            "PUBLISHED" => JobStatus::Published,
            "FAILED" => JobStatus::Failed,
            "CANCELLED" => JobStatus::Cancelled,
            _ => return Err(ParseDefError::new("job status", s)),
        };
        Ok(status)
    }
}

/// The stance the post should take towards the article. Anything that is not
/// one of the three presets is kept verbatim as a custom opinion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Opinion {
    Agree,
    Disagree,
    Neutral,
    Custom(String),
}

impl Opinion {
    pub fn as_str(&self) -> &str {
        match self {
            Opinion::Agree => "agree",
            Opinion::Disagree => "disagree",
            Opinion::Neutral => "neutral",
            Opinion::Custom(text) => text,
        }
    }
}

impl From<String> for Opinion {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "agree" => Opinion::Agree,
            "disagree" => Opinion::Disagree,
            "neutral" => Opinion::Neutral,
            _ => Opinion::Custom(value.trim().to_string()),
        }
    }
}

impl From<&str> for Opinion {
    fn from(value: &str) -> Self {
        Opinion::from(value.to_string())
    }
}

impl From<Opinion> for String {
    fn from(opinion: Opinion) -> Self {
        match opinion {
            Opinion::Custom(text) => text,
            other => other.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Conversational,
    Enthusiastic,
    Analytical,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Conversational => "conversational",
            Tone::Enthusiastic => "enthusiastic",
            Tone::Analytical => "analytical",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = ParseDefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "professional" => Ok(Tone::Professional),
            "conversational" => Ok(Tone::Conversational),
            "enthusiastic" => Ok(Tone::Enthusiastic),
            "analytical" => Ok(Tone::Analytical),
            _ => Err(ParseDefError::new("tone", s)),
        }
    }
}

pub const DEFAULT_NEGATIVE_PROMPT: &str = "no text, no logos";

fn default_style() -> String {
    "photographic".to_string()
}

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}

fn default_image_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOptions {
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// When set, a variant cannot be published without a moderated image.
    #[serde(default = "default_image_required")]
    pub required: bool,
}

impl ImageOptions {
    pub fn negative_prompt(&self) -> &str {
        self.negative_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or(DEFAULT_NEGATIVE_PROMPT)
    }
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            style: default_style(),
            aspect_ratio: default_aspect_ratio(),
            negative_prompt: None,
            required: default_image_required(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    pub url: String,
    pub opinion: Opinion,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub image_options: ImageOptions,
}

/// Slot of a variant within its job, shown to users as a letter (A, B, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariantId(u8);

impl VariantId {
    pub const A: VariantId = VariantId(0);
    pub const B: VariantId = VariantId(1);
    pub const MAX_SLOTS: usize = 26;

    pub fn from_index(index: usize) -> Option<Self> {
        if index < Self::MAX_SLOTS {
            Some(VariantId(index as u8))
        } else {
            None
        }
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn letter(&self) -> char {
        (b'A' + self.0) as char
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for VariantId {
    type Err = ParseDefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(letter), None) if letter.is_ascii_alphabetic() => {
                let index = letter.to_ascii_uppercase() as u8 - b'A';
                Ok(VariantId(index))
            }
            _ => Err(ParseDefError::new("variant", s)),
        }
    }
}

impl TryFrom<String> for VariantId {
    type Error = ParseDefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VariantId> for String {
    fn from(id: VariantId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Flag,
    #[default]
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    #[default]
    Unpublished,
    Publishing,
    Published,
    Failed,
}

/// Sub-state of a single variant while it is being regenerated or
/// re-moderated after the job reached READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantStage {
    #[default]
    Idle,
    GeneratingText,
    GeneratingImage,
    Moderating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextOrigin {
    Generated,
    Edited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    GenerateText,
    GenerateImage,
    Moderate,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::GenerateText => "generate_text",
            Capability::GenerateImage => "generate_image",
            Capability::Moderate => "moderate",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostText {
    pub body: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub suggested_comment: Option<String>,
    #[serde(default)]
    pub alt_text: Option<String>,
    pub origin: TextOrigin,
    pub created_at: DateTime<Utc>,
}

impl PostText {
    pub fn edited(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            hashtags: Vec::new(),
            suggested_comment: None,
            alt_text: None,
            origin: TextOrigin::Edited,
            created_at: Utc::now(),
        }
    }

    /// Body followed by the hashtags that do not already appear in it as a
    /// whole tag.
    pub fn publishable_text(&self) -> String {
        let present: Vec<&str> = self
            .body
            .split(|c: char| !(c.is_alphanumeric() || c == '#' || c == '_'))
            .filter(|token| token.starts_with('#'))
            .collect();
        let missing: Vec<&str> = self
            .hashtags
            .iter()
            .map(String::as_str)
            .filter(|tag| !present.iter().any(|token| token.eq_ignore_ascii_case(tag)))
            .collect();
        if missing.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n\n{}", self.body.trim_end(), missing.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Key of the payload in the image store. Never reused across generations.
    pub reference: String,
    pub prompt: String,
    #[serde(default = "default_image_mime_type")]
    pub mime_type: String,
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

fn default_image_mime_type() -> String {
    "image/png".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub stage: JobStatus,
    pub capability: Option<Capability>,
    pub backend: Option<String>,
    pub message: String,
}

impl JobError {
    pub fn new(stage: JobStatus, message: impl Into<String>) -> Self {
        Self {
            stage,
            capability: None,
            backend: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.stage)?;
        match (&self.capability, &self.backend) {
            (Some(capability), Some(backend)) => write!(f, " ({} via {})", capability, backend)?,
            (Some(capability), None) => write!(f, " ({})", capability)?,
            (None, Some(backend)) => write!(f, " (via {})", backend)?,
            (None, None) => {}
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub text: Option<PostText>,
    pub verdict: Verdict,
    pub image: Option<Image>,
    pub publish_state: PublishState,
    #[serde(default)]
    pub post_url: Option<String>,
    #[serde(default)]
    pub stage: VariantStage,
    #[serde(default)]
    pub last_error: Option<JobError>,
}

impl Variant {
    pub fn new(id: VariantId) -> Self {
        Self {
            id,
            text: None,
            verdict: Verdict::Pending,
            image: None,
            publish_state: PublishState::Unpublished,
            post_url: None,
            stage: VariantStage::Idle,
            last_error: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.stage != VariantStage::Idle
    }

    pub fn is_flagged(&self) -> bool {
        self.verdict == Verdict::Flag
            || self.image.as_ref().is_some_and(|image| image.verdict == Verdict::Flag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleContent {
    pub url: String,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    #[serde(default)]
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub input: JobInput,
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub article: Option<ArticleContent>,
    #[serde(default)]
    pub summary: Option<Summary>,
    #[serde(default)]
    pub error: Option<JobError>,
    /// Write counter maintained by the job store for conditional updates.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(input: JobInput, variant_count: usize) -> Self {
        let now = Utc::now();
        let variants = (0..variant_count.clamp(1, VariantId::MAX_SLOTS))
            .filter_map(VariantId::from_index)
            .map(Variant::new)
            .collect();

        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            input,
            variants,
            article: None,
            summary: None,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.iter().find(|variant| variant.id == id)
    }

    pub fn variant_mut(&mut self, id: VariantId) -> Option<&mut Variant> {
        self.variants.iter_mut().find(|variant| variant.id == id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Moves the job to FAILED and records why. The error detail is only ever
    /// set together with the FAILED status.
    pub fn fail(&mut self, error: JobError) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn regeneration_in_flight(&self) -> bool {
        self.variants.iter().any(Variant::is_busy)
    }

    pub fn moderation_warning(&self) -> bool {
        self.variants.iter().any(Variant::is_flagged)
    }
}
