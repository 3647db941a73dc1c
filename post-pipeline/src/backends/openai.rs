use crate::config::OpenAiSettings;
use crate::provider::{
    AiBackend, GeneratedImage, ImageGenOptions, ModerationInput, ProviderError, ProviderResult, TextOptions,
};
use crate::types::Verdict;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const MODERATION_MODEL: &str = "omni-moderation-latest";
const SYSTEM_PROMPT: &str = "You are a professional LinkedIn content writer. Follow the requested output format exactly.";

pub struct OpenAiBackend {
    http: Client,
    api_key: String,
    text_model: String,
    image_model: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(settings: &OpenAiSettings) -> Self {
        Self {
            http: Client::new(),
            api_key: settings.api_key.clone(),
            text_model: settings.text_model.clone(),
            image_model: settings.image_model.clone(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| ProviderError::Auth("API key is not a valid header value".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(ProviderError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &error_text));
        }

        response.json().await.map_err(ProviderError::from_request)
    }
}

/// Maps an aspect ratio onto the closest size the images endpoint accepts.
fn image_size(aspect_ratio: &str) -> &'static str {
    match aspect_ratio.trim() {
        "1:1" => "1024x1024",
        "9:16" | "4:5" | "2:3" | "3:4" => "1024x1536",
        _ => "1536x1024",
    }
}

#[async_trait]
impl AiBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> ProviderResult<String> {
        debug!(model = %self.text_model, "OpenAI chat request");

        let mut body = json!({
            "model": self.text_model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ],
            "temperature": options.temperature,
            "max_tokens": options.max_output_tokens,
        });
        if options.json {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response: ChatResponse = self.post("/chat/completions", &body).await?;
        let choice = response.choices.into_iter().next().ok_or(ProviderError::EmptyResponse)?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderError::PolicyViolation("completion stopped by content filter".to_string()));
        }

        choice
            .message
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn generate_image(&self, prompt: &str, options: &ImageGenOptions) -> ProviderResult<GeneratedImage> {
        debug!(model = %self.image_model, "OpenAI image request");

        let mut body = json!({
            "model": self.image_model,
            "prompt": format!("{} Style: {}. Avoid: {}.", prompt, options.style, options.negative_prompt),
            "size": image_size(&options.aspect_ratio),
            "n": 1,
        });
        if self.image_model.starts_with("dall-e") {
            body["response_format"] = json!("b64_json");
            body["size"] = json!("1024x1024");
        }

        let response: ImageResponse = self.post("/images/generations", &body).await?;
        let encoded = response
            .data
            .into_iter()
            .find_map(|image| image.b64_json)
            .ok_or(ProviderError::EmptyResponse)?;

        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| ProviderError::Transient(format!("invalid image payload: {}", e)))?;

        Ok(GeneratedImage {
            bytes,
            mime_type: "image/png".to_string(),
        })
    }

    async fn moderate(&self, input: &ModerationInput) -> ProviderResult<Verdict> {
        let moderation_input = match input {
            ModerationInput::Text(text) => json!(text),
            ModerationInput::Image { bytes, mime_type } => json!([{
                "type": "image_url",
                "image_url": { "url": format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes)) }
            }]),
        };
        let body = json!({ "model": MODERATION_MODEL, "input": moderation_input });

        let response: ModerationResponse = self.post("/moderations", &body).await?;
        let result = response.results.into_iter().next().ok_or(ProviderError::EmptyResponse)?;

        Ok(if result.flagged { Verdict::Flag } else { Verdict::Pass })
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .headers(self.headers()?)
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
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    flagged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_size_for_aspect_ratio() {
        assert_eq!(image_size("16:9"), "1536x1024");
        assert_eq!(image_size("1:1"), "1024x1024");
        assert_eq!(image_size("4:5"), "1024x1536");
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"hi"},"finish_reason":"stop"}]}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_moderation_response_parsing() {
        let raw = r#"{"id":"modr-1","model":"omni-moderation-latest","results":[{"flagged":true,"categories":{}}]}"#;
        let response: ModerationResponse = serde_json::from_str(raw).unwrap();
        assert!(response.results[0].flagged);
    }
}
