use crate::config::GeminiSettings;
use crate::moderation::verdict_from_response;
use crate::prompts;
use crate::provider::{
    AiBackend, GeneratedImage, ImageGenOptions, ModerationInput, ProviderError, ProviderResult, TextOptions,
};
use crate::types::Verdict;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Generative Language API. Moderation is prompted through the text
/// model since the API has no dedicated moderation endpoint.
pub struct GeminiBackend {
    http: Client,
    api_key: String,
    text_model: String,
    image_model: String,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(settings: &GeminiSettings) -> Self {
        Self {
            http: Client::new(),
            api_key: settings.api_key.clone(),
            text_model: settings.text_model.clone(),
            image_model: settings.image_model.clone(),
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    async fn generate_content(&self, model: &str, body: Value) -> ProviderResult<GenerateContentResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        debug!(model = %model, "Gemini generateContent request");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &error_text));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(ProviderError::from_request)?;

        if let Some(reason) = parsed.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_ref()) {
            return Err(ProviderError::PolicyViolation(format!("prompt blocked: {}", reason)));
        }
        if parsed.first_finish_reason() == Some("SAFETY") {
            return Err(ProviderError::PolicyViolation("response blocked by safety filters".to_string()));
        }

        Ok(parsed)
    }

    async fn moderate_text(&self, content: &str) -> ProviderResult<Verdict> {
        let prompt = prompts::moderation_prompt(content);
        let answer = self.generate_text(&prompt, &TextOptions { temperature: 0.0, ..TextOptions::json() }).await?;
        Ok(verdict_from_response(&answer))
    }

    async fn moderate_image(&self, bytes: &[u8], mime_type: &str) -> ProviderResult<Verdict> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompts::image_moderation_prompt() },
                    { "inlineData": { "mimeType": mime_type, "data": STANDARD.encode(bytes) } }
                ]
            }],
            "generationConfig": { "temperature": 0.0, "responseMimeType": "application/json" }
        });

        let response = self.generate_content(&self.text_model, body).await?;
        let answer = response.joined_text().ok_or(ProviderError::EmptyResponse)?;
        Ok(verdict_from_response(&answer))
    }
}

#[async_trait]
impl AiBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> ProviderResult<String> {
        let mut generation_config = json!({
            "temperature": options.temperature,
            "maxOutputTokens": options.max_output_tokens,
        });
        if options.json {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": generation_config,
        });

        let response = self.generate_content(&self.text_model, body).await?;
        response
            .joined_text()
            .filter(|text| !text.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn generate_image(&self, prompt: &str, options: &ImageGenOptions) -> ProviderResult<GeneratedImage> {
        let full_prompt = format!(
            "{}\nStyle: {}. Aspect ratio: {}. Avoid: {}.",
            prompt, options.style, options.aspect_ratio, options.negative_prompt
        );
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": full_prompt }] }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });

        let response = self.generate_content(&self.image_model, body).await?;
        let inline = response.first_inline_data().ok_or(ProviderError::EmptyResponse)?;

        let bytes = STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|e| ProviderError::Transient(format!("invalid image payload: {}", e)))?;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        Ok(GeneratedImage {
            bytes,
            mime_type: inline.mime_type.clone(),
        })
    }

    async fn moderate(&self, input: &ModerationInput) -> ProviderResult<Verdict> {
        match input {
            ModerationInput::Text(text) => self.moderate_text(text).await,
            ModerationInput::Image { bytes, mime_type } => self.moderate_image(bytes, mime_type).await,
        }
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let url = format!("{}/models/{}", self.base_url, self.text_model);
        let response = self
            .http
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(ProviderError::from_request)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(ProviderError::from_status(status, &error_text))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .take(1)
            .filter_map(|c| c.content.as_ref())
            .flat_map(|content| content.parts.iter())
    }

    fn joined_text(&self) -> Option<String> {
        let text: Vec<&str> = self.parts().filter_map(|part| part.text.as_deref()).collect();
        if text.is_empty() {
            None
        } else {
            Some(text.concat())
        }
    }

    fn first_inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(|part| part.inline_data.as_ref())
    }

    fn first_finish_reason(&self) -> Option<&str> {
        self.candidates.first().and_then(|c| c.finish_reason.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}
