use crate::types::{Capability, ImageOptions, Verdict};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Why a backend call failed. The variant decides whether the gateway moves on
/// to the next backend or gives up.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("{0} is not supported by this backend")]
    Unsupported(Capability),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("content policy violation: {0}")]
    PolicyViolation(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Transient(_)
                | ProviderError::Timeout(_)
                | ProviderError::EmptyResponse
                | ProviderError::Unsupported(_)
        )
    }

    /// Classifies a non-success HTTP response from a vendor API.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status.as_u16(), crate::utils::truncate_to_char_boundary(body, 300));
        let lowered = body.to_lowercase();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(detail),
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
            StatusCode::REQUEST_TIMEOUT => ProviderError::Transient(detail),
            s if s.is_client_error() => {
                if lowered.contains("safety") || lowered.contains("content_policy") || lowered.contains("policy") {
                    ProviderError::PolicyViolation(detail)
                } else {
                    ProviderError::InvalidInput(detail)
                }
            }
            _ => ProviderError::Transient(detail),
        }
    }

    pub fn from_request(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::Transient(format!("request timed out: {}", error))
        } else if error.is_decode() {
            ProviderError::Transient(format!("undecodable response: {}", error))
        } else {
            ProviderError::Transient(error.to_string())
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Clone)]
pub struct TextOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the backend for a JSON object rather than prose.
    pub json: bool,
}

impl TextOptions {
    pub fn json() -> Self {
        Self {
            json: true,
            ..Self::default()
        }
    }
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 2048,
            json: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageGenOptions {
    pub style: String,
    pub aspect_ratio: String,
    pub negative_prompt: String,
}

impl From<&ImageOptions> for ImageGenOptions {
    fn from(options: &ImageOptions) -> Self {
        Self {
            style: options.style.clone(),
            aspect_ratio: options.aspect_ratio.clone(),
            negative_prompt: options.negative_prompt().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub enum ModerationInput {
    Text(String),
    Image { bytes: Vec<u8>, mime_type: String },
}

impl ModerationInput {
    pub fn text(&self) -> Option<&str> {
        match self {
            ModerationInput::Text(text) => Some(text),
            ModerationInput::Image { .. } => None,
        }
    }
}

/// One AI vendor behind the capability contract the pipeline relies on.
#[async_trait]
pub trait AiBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> ProviderResult<String>;

    async fn generate_image(&self, prompt: &str, options: &ImageGenOptions) -> ProviderResult<GeneratedImage>;

    /// Returns PASS or FLAG; never PENDING.
    async fn moderate(&self, input: &ModerationInput) -> ProviderResult<Verdict>;

    async fn health_check(&self) -> ProviderResult<()>;
}

/// Scriptable in-process backend for tests and offline demos.
pub struct MockBackend {
    name: String,
    response_delay: Duration,
    flagged_terms: Vec<String>,
    flag_images: bool,
    image_mime_type: String,
    healthy: bool,
    scripted: Mutex<HashMap<Capability, VecDeque<ProviderError>>>,
    persistent: HashMap<Capability, ProviderError>,
    text_calls: AtomicUsize,
    image_calls: AtomicUsize,
    moderation_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_delay: Duration::ZERO,
            flagged_terms: Vec::new(),
            flag_images: false,
            image_mime_type: "image/png".to_string(),
            healthy: true,
            scripted: Mutex::new(HashMap::new()),
            persistent: HashMap::new(),
            text_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
            moderation_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Text containing any of these terms (case-insensitive) is flagged.
    pub fn with_flagged_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flagged_terms = terms.into_iter().map(|t| t.into().to_lowercase()).collect();
        self
    }

    pub fn flag_images(mut self) -> Self {
        self.flag_images = true;
        self
    }

    pub fn with_image_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.image_mime_type = mime_type.into();
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Queues errors returned by the next calls of `capability`, in order.
    pub fn failing_next(mut self, capability: Capability, errors: Vec<ProviderError>) -> Self {
        self.scripted.get_mut().entry(capability).or_default().extend(errors);
        self
    }

    /// Every call of `capability` fails with `error`.
    pub fn failing_always(mut self, capability: Capability, error: ProviderError) -> Self {
        self.persistent.insert(capability, error);
        self
    }

    pub fn calls(&self, capability: Capability) -> usize {
        self.counter(capability).load(Ordering::SeqCst)
    }

    fn counter(&self, capability: Capability) -> &AtomicUsize {
        match capability {
            Capability::GenerateText => &self.text_calls,
            Capability::GenerateImage => &self.image_calls,
            Capability::Moderate => &self.moderation_calls,
        }
    }

    async fn begin_call(&self, capability: Capability) -> ProviderResult<usize> {
        let call = self.counter(capability).fetch_add(1, Ordering::SeqCst) + 1;

        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }

        if let Some(error) = self.scripted.lock().await.get_mut(&capability).and_then(VecDeque::pop_front) {
            debug!("Mock backend {} failing {} call {}: {}", self.name, capability, call, error);
            return Err(error);
        }
        if let Some(error) = self.persistent.get(&capability) {
            return Err(error.clone());
        }
        Ok(call)
    }

    fn slot_hint(prompt: &str) -> String {
        prompt
            .find("Variant ")
            .and_then(|index| prompt[index + "Variant ".len()..].chars().next())
            .filter(char::is_ascii_uppercase)
            .map(|letter| format!("Variant {}", letter))
            .unwrap_or_else(|| "Draft".to_string())
    }
}

#[async_trait]
impl AiBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> ProviderResult<String> {
        let call = self.begin_call(Capability::GenerateText).await?;
        let slot = Self::slot_hint(prompt);

        if !options.json {
            return Ok(format!(
                "Editorial photograph illustrating the article themes ({} #{} from {})",
                slot, call, self.name
            ));
        }

        // One payload satisfies every JSON prompt; callers read the fields they need.
        let payload = json!({
            "summary": format!("Mock summary #{} from {}.", call, self.name),
            "bullets": ["First key point", "Second key point", "Third key point"],
            "text": format!("{} post #{} from {}: a short take on the article.", slot, call, self.name),
            "hashtags": ["#Leadership", "#FutureOfWork", "#Insights"],
            "suggested_comment": "What has your experience been?",
            "alt_text": "Illustration of the article topic",
            "status": "pass",
            "notes": ""
        });
        Ok(payload.to_string())
    }

    async fn generate_image(&self, _prompt: &str, _options: &ImageGenOptions) -> ProviderResult<GeneratedImage> {
        let call = self.begin_call(Capability::GenerateImage).await?;
        Ok(GeneratedImage {
            bytes: format!("mock-image-{}-{}", self.name, call).into_bytes(),
            mime_type: self.image_mime_type.clone(),
        })
    }

    async fn moderate(&self, input: &ModerationInput) -> ProviderResult<Verdict> {
        self.begin_call(Capability::Moderate).await?;

        let flagged = match input {
            ModerationInput::Text(text) => {
                let lowered = text.to_lowercase();
                self.flagged_terms.iter().any(|term| lowered.contains(term))
            }
            ModerationInput::Image { .. } => self.flag_images,
        };
        Ok(if flagged { Verdict::Flag } else { Verdict::Pass })
    }

    async fn health_check(&self) -> ProviderResult<()> {
        if self.healthy {
            Ok(())
        } else {
            Err(ProviderError::Transient(format!("{} is unreachable", self.name)))
        }
    }
}
