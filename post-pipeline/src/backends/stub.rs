use crate::provider::{
    AiBackend, GeneratedImage, ImageGenOptions, ModerationInput, ProviderError, ProviderResult, TextOptions,
};
use crate::types::Verdict;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

/// 1x1 light grey PNG.
const PLACEHOLDER_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP48f/ffwAJ6gPyr3jOKgAAAABJRU5ErkJggg==";

const BLOCKED_TERMS: &[&str] = &["hate speech", "violence", "scam", "get rich quick", "explicit"];

/// Offline development backend. Produces canned but well-formed output so the
/// whole pipeline can run without API keys.
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> ProviderResult<String> {
        let lowered = prompt.trim_start().to_lowercase();

        if !options.json {
            return Ok("Professional editorial photograph of a modern workplace, soft natural light".to_string());
        }

        let payload = if lowered.starts_with("summarize") {
            json!({
                "summary": "This is a comprehensive summary of the article that provides key insights and main points.",
                "bullets": ["Key insight one", "Key insight two", "Key insight three"]
            })
        } else if lowered.starts_with("review the following") {
            json!({ "status": "pass", "notes": [] })
        } else {
            json!({
                "text": "This is a compelling LinkedIn post that engages readers with thought-provoking content.",
                "hashtags": ["#Innovation", "#Leadership", "#Growth"],
                "suggested_comment": "What are your thoughts?",
                "alt_text": "Abstract illustration for a LinkedIn post"
            })
        };
        Ok(payload.to_string())
    }

    async fn generate_image(&self, _prompt: &str, _options: &ImageGenOptions) -> ProviderResult<GeneratedImage> {
        let bytes = STANDARD
            .decode(PLACEHOLDER_PNG)
            .map_err(|e| ProviderError::Transient(format!("placeholder image: {}", e)))?;
        Ok(GeneratedImage {
            bytes,
            mime_type: "image/png".to_string(),
        })
    }

    async fn moderate(&self, input: &ModerationInput) -> ProviderResult<Verdict> {
        let flagged = input.text().is_some_and(|text| {
            let lowered = text.to_lowercase();
            BLOCKED_TERMS.iter().any(|term| lowered.contains(term))
        });
        Ok(if flagged { Verdict::Flag } else { Verdict::Pass })
    }

    async fn health_check(&self) -> ProviderResult<()> {
        Ok(())
    }
}
