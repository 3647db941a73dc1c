use crate::config::{LinkedInSettings, PublishRetryConfig};
use crate::types::{JobId, VariantId};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const LINKEDIN_API_URL: &str = "https://api.linkedin.com/v2";
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("LinkedIn authentication failed: {0}")]
    Auth(String),

    #[error("LinkedIn rate limit hit: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("LinkedIn rejected the post: {0}")]
    Rejected(String),

    #[error("LinkedIn request failed: {0}")]
    Transient(String),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::RateLimited { .. } | PublishError::Transient(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PublishError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    async fn from_response(response: Response) -> Self {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), crate::utils::truncate_to_char_boundary(&body, 300));

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishError::Auth(message),
            StatusCode::TOO_MANY_REQUESTS => PublishError::RateLimited { message, retry_after },
            s if s.is_client_error() => PublishError::Rejected(message),
            _ => PublishError::Transient(message),
        }
    }
}

/// What gets posted for one variant.
#[derive(Debug, Clone)]
pub struct PostDraft {
    pub job_id: JobId,
    pub variant: VariantId,
    pub text: String,
    pub image: Option<DraftImage>,
}

#[derive(Debug, Clone)]
pub struct DraftImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub post_id: String,
    pub post_url: String,
}

/// The LinkedIn boundary. Implementations make a single attempt; retry policy
/// lives in [`publish_with_retry`].
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, draft: &PostDraft) -> Result<PublishResult, PublishError>;
}

/// Publishes with bounded exponential backoff on rate limits and transient
/// failures. Auth and rejection errors return immediately.
pub async fn publish_with_retry(
    publisher: &dyn Publisher,
    draft: &PostDraft,
    config: &PublishRetryConfig,
) -> Result<PublishResult, PublishError> {
    let max_attempts = config.max_attempts.max(1);
    let mut policy = ExponentialBackoff {
        current_interval: config.base_delay,
        initial_interval: config.base_delay,
        randomization_factor: 0.0,
        multiplier: config.multiplier,
        max_interval: MAX_RETRY_AFTER,
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        match publisher.publish(draft).await {
            Ok(result) => {
                info!(
                    "Published job {} variant {} via {} as {}",
                    draft.job_id,
                    draft.variant,
                    publisher.name(),
                    result.post_id
                );
                return Ok(result);
            }
            Err(error) if error.is_retryable() && attempt < max_attempts => {
                let backoff_delay = policy.next_backoff().unwrap_or(config.base_delay);
                let delay = error.retry_after().map_or(backoff_delay, |d| d.min(MAX_RETRY_AFTER));
                warn!(
                    "Publish attempt {}/{} for job {} failed: {}; retrying in {:?}",
                    attempt, max_attempts, draft.job_id, error, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                warn!(
                    "Publish of job {} variant {} failed after {} attempt(s): {}",
                    draft.job_id, draft.variant, attempt, error
                );
                return Err(error);
            }
        }
    }
}

/// Posts through the LinkedIn UGC API: register an image upload, upload the
/// bytes, then create the post referencing the uploaded asset.
pub struct LinkedInPublisher {
    http: Client,
    access_token: String,
    author_urn: String,
    base_url: String,
}

impl LinkedInPublisher {
    pub fn new(settings: &LinkedInSettings) -> Self {
        Self {
            http: Client::new(),
            access_token: settings.access_token.clone(),
            author_urn: settings.author_urn.clone(),
            base_url: LINKEDIN_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, PublishError> {
        let response = request
            .bearer_auth(&self.access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .send()
            .await
            .map_err(|e| PublishError::Transient(e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(PublishError::from_response(response).await)
        }
    }

    async fn upload_image(&self, image: &DraftImage) -> Result<String, PublishError> {
        let register = json!({
            "registerUploadRequest": {
                "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                "owner": self.author_urn,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });

        let response = self
            .send(
                self.http
                    .post(format!("{}/assets?action=registerUpload", self.base_url))
                    .json(&register),
            )
            .await?;
        let registered: RegisterUploadResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Transient(format!("unreadable registerUpload response: {}", e)))?;

        let upload_url = registered.value.upload_mechanism.http_request.upload_url;
        debug!(
            "Uploading {} bytes of {} for asset {}",
            image.bytes.len(),
            image.mime_type,
            registered.value.asset
        );

        self.send(
            self.http
                .put(&upload_url)
                .header(reqwest::header::CONTENT_TYPE, image.mime_type.as_str())
                .body(image.bytes.clone()),
        )
        .await?;
        Ok(registered.value.asset)
    }
}

#[async_trait]
impl Publisher for LinkedInPublisher {
    fn name(&self) -> &str {
        "linkedin"
    }

    async fn publish(&self, draft: &PostDraft) -> Result<PublishResult, PublishError> {
        let media = match &draft.image {
            Some(image) => {
                let asset = self.upload_image(image).await?;
                vec![json!({
                    "status": "READY",
                    "description": { "text": image.alt_text.clone().unwrap_or_default() },
                    "media": asset,
                })]
            }
            None => Vec::new(),
        };
        let category = if media.is_empty() { "NONE" } else { "IMAGE" };

        let post = json!({
            "author": self.author_urn,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": draft.text },
                    "shareMediaCategory": category,
                    "media": media,
                }
            },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" }
        });

        let response = self
            .send(self.http.post(format!("{}/ugcPosts", self.base_url)).json(&post))
            .await?;

        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let post_id = match header_id {
            Some(id) => id,
            None => {
                let created: CreatedPost = response
                    .json()
                    .await
                    .map_err(|e| PublishError::Transient(format!("unreadable ugcPosts response: {}", e)))?;
                created.id
            }
        };

        Ok(PublishResult {
            post_url: format!("https://www.linkedin.com/feed/update/{}", post_id),
            post_id,
        })
    }
}

/// Stands in for LinkedIn when no access token is configured. Returns a
/// synthetic post id derived from the job and variant.
pub struct SimulatedPublisher;

#[async_trait]
impl Publisher for SimulatedPublisher {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn publish(&self, draft: &PostDraft) -> Result<PublishResult, PublishError> {
        let post_id = format!("linkedin_{}_{}", draft.job_id, draft.variant);
        info!("Simulated LinkedIn publish: {}", post_id);
        Ok(PublishResult {
            post_url: format!("https://www.linkedin.com/feed/update/{}", post_id),
            post_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RegisterUploadResponse {
    value: RegisteredUpload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisteredUpload {
    asset: String,
    upload_mechanism: UploadMechanism,
}

#[derive(Debug, Deserialize)]
struct UploadMechanism {
    #[serde(rename = "com.linkedin.digitalmedia.uploadMechanism.MediaUploadHttpRequest")]
    http_request: UploadHttpRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadHttpRequest {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}
