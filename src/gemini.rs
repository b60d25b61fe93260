use async_trait::async_trait;
use base64::Engine;
use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::StudioConfig;
use crate::gateway::{GenerationError, GenerationGateway, GenerationRequest};
use crate::intake::sniff_mime_type;

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = serde_json::Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

/// Wraps a style prompt in the instructions sent alongside the client's photo.
pub fn build_photo_edit_prompt(style_prompt: &str) -> String {
    format!(
        "Edit this photo so the person has {}. Keep their face, skin tone, expression and background unchanged. Photorealistic salon lookbook quality.",
        style_prompt.trim()
    )
}

fn preview(data: &str) -> String {
    if data.len() > 50 && data.is_char_boundary(50) {
        format!("{}...[{} chars total]", &data[..50], data.len())
    } else {
        data.to_string()
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &StudioConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.image_model.clone(),
        }
    }

    fn is_demo(&self) -> bool {
        self.api_key == crate::config::DEMO_KEY
    }

    async fn perform_api_call(&self, request: &GenerationRequest<'_>) -> Result<Option<String>, GenerationError> {
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, self.model, self.api_key);
        debug!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));

        let mut parts = vec![json!({
            "inlineData": { "mimeType": request.mime_type, "data": request.source_image }
        })];
        if let Some(reference) = request.reference_image {
            let mime = sniff_mime_type(reference).unwrap_or("image/png");
            parts.push(json!({ "inlineData": { "mimeType": mime, "data": reference } }));
        }
        parts.push(json!({ "text": build_photo_edit_prompt(request.prompt) }));

        let mut request_body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "temperature": 0.4,
                "topP": 0.95,
                "topK": 64,
                "candidateCount": 1
            }
        });

        let response = self.client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            truncate_base64_in_json(&mut request_body);
            debug!("📤 Request body: {}", request_body);
        }

        let status = response.status();
        info!("📥 Response status: {}", status);

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("⏳ Image service rate limited the request");
            return Err(GenerationError::RateLimited);
        }
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ API Error response: {}", error_body);
            return Err(GenerationError::Transport(format!("status={} body={}", status, error_body)));
        }

        let response_text = response.text().await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        let parsed: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::Transport(format!("parse error: {}", e)))?;

        if let Some(reason) = parsed.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()) {
            warn!("🚫 Prompt declined by image service: {}", reason);
            return Ok(None);
        }

        let image = extract_first_image_b64(&parsed);
        match &image {
            Some(data) => info!("🖼️ Extracted image from API response: {}", preview(data)),
            None => info!("⚠️ No image data found in API response"),
        }
        Ok(image)
    }

    fn generate_placeholder_image(&self, prompt: &str) -> String {
        let palette = ["#B45309", "#9D174D", "#6D28D9", "#0F766E", "#1D4ED8"];
        let color = palette.choose(&mut rand::thread_rng()).copied().unwrap_or("#6D28D9");
        let caption: String = prompt.chars().take(40).collect();
        let caption = caption.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");

        let svg = format!(r#"<svg width="512" height="512" xmlns="http://www.w3.org/2000/svg">
            <rect width="512" height="512" fill="{}" />
            <text x="256" y="240" font-family="Arial, sans-serif" font-size="28" font-weight="bold"
                  text-anchor="middle" fill="white">✂ Design Studio</text>
            <text x="256" y="290" font-family="Arial, sans-serif" font-size="14"
                  text-anchor="middle" fill="white" opacity="0.85">{}</text>
        </svg>"#, color, caption);

        base64::engine::general_purpose::STANDARD.encode(svg.as_bytes())
    }
}

#[async_trait]
impl GenerationGateway for GeminiClient {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Option<String>, GenerationError> {
        request.validate()?;

        if self.is_demo() {
            info!("Using demo mode - no real images generated");
            let placeholder = self.generate_placeholder_image(request.prompt);
            info!("📦 Generated placeholder image: {}", preview(&placeholder));
            return Ok(Some(placeholder));
        }

        info!(model = %self.model, prompt_len = request.prompt.len(), with_reference = request.reference_image.is_some(), "Generating image with Gemini API...");
        let result = self.perform_api_call(&request).await;
        if let Err(e) = &result {
            error!("❌ Failed to generate image: {}", e);
        }
        result
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    #[allow(dead_code)]
    Text { text: String },
    #[allow(dead_code)]
    Other(serde_json::Value)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

fn extract_first_image_b64(resp: &GeminiResponse) -> Option<String> {
    for c in &resp.candidates {
        for p in &c.content.parts {
            if let Part::Inline { inline_data } = p {
                debug!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                return Some(inline_data.data.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client_for(base_url: &str) -> GeminiClient {
        let config = StudioConfig {
            api_key: "test-key".into(),
            api_base: base_url.to_string(),
            image_model: "image-model".into(),
            ..StudioConfig::default()
        };
        GeminiClient::new(&config)
    }

    fn request<'a>() -> GenerationRequest<'a> {
        GenerationRequest { source_image: "cGhvdG8=", mime_type: "image/jpeg", prompt: "a bob cut", reference_image: None }
    }

    #[tokio::test]
    async fn returns_inline_image_data() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/image-model:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""data":"cGhvdG8=""#.into()),
                Matcher::Regex("person has a bob cut".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"here you go"},{"inlineData":{"mimeType":"image/png","data":"aW1hZ2U="}}]}}]}"#)
            .create_async()
            .await;

        let result = client_for(&server.url()).generate(request()).await;
        mock.assert_async().await;
        assert_eq!(result, Ok(Some("aW1hZ2U=".to_string())));
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/image-model:generateContent")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body(r#"{"error":{"code":429}}"#)
            .create_async()
            .await;

        let result = client_for(&server.url()).generate(request()).await;
        assert_eq!(result, Err(GenerationError::RateLimited));
    }

    #[tokio::test]
    async fn server_errors_are_transport_failures() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/image-model:generateContent")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let result = client_for(&server.url()).generate(request()).await;
        assert!(matches!(result, Err(GenerationError::Transport(msg)) if msg.contains("500")));
    }

    #[tokio::test]
    async fn text_only_or_blocked_responses_are_soft_failures() {
        let mut server = Server::new_async().await;
        let _text = server
            .mock("POST", "/models/image-model:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"I can't do that"}]}}]}"#)
            .create_async()
            .await;
        assert_eq!(client_for(&server.url()).generate(request()).await, Ok(None));

        let mut server = Server::new_async().await;
        let _blocked = server
            .mock("POST", "/models/image-model:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .create_async()
            .await;
        assert_eq!(client_for(&server.url()).generate(request()).await, Ok(None));
    }

    #[tokio::test]
    async fn demo_mode_returns_placeholder_without_network() {
        let client = GeminiClient::new(&StudioConfig::default());
        let image = client.generate(request()).await.unwrap().unwrap();
        let svg = base64::engine::general_purpose::STANDARD.decode(image).unwrap();
        assert!(String::from_utf8(svg).unwrap().contains("a bob cut"));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_network() {
        let client = client_for("http://127.0.0.1:9");
        let req = GenerationRequest { prompt: "", ..request() };
        assert!(matches!(client.generate(req).await, Err(GenerationError::InvalidInput(_))));
    }

    #[test]
    fn truncates_long_base64_fields() {
        let mut value = json!({ "parts": [{ "inlineData": { "data": "A".repeat(500) } }] });
        truncate_base64_in_json(&mut value);
        let data = value["parts"][0]["inlineData"]["data"].as_str().unwrap();
        assert!(data.contains("truncated 450 chars"));
    }
}
