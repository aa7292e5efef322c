//! HTTP client for OpenAI-compatible chat completion and image generation APIs.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::{GenerationError, ImageInput, ImageModel, TextCompletion, TextModel, VisionModel};
use crate::config::GenerationConfig;

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: i32,
    completion_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
}

impl ChatCompletionResponse {
    fn into_content(self) -> Result<(String, Option<String>, Option<ChatUsage>), GenerationError> {
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GenerationError::MalformedResponse("completion has no content".to_string()))?;
        Ok((content, self.model, self.usage))
    }
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

/// One client for text, vision and image calls. Each call carries its own timeout.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: Url,
    config: GenerationConfig,
}

impl OpenAiClient {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: ensure_slash(&config.base_url),
            config,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<T, GenerationError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| GenerationError::MalformedResponse(format!("invalid endpoint URL: {e}")))?;

        let mut request = self.client.post(url).timeout(timeout).json(body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| classify(e, operation, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await.map_err(|e| classify(e, operation, timeout))?;
        debug!(operation, bytes = text.len(), "Model API response received");
        Ok(serde_json::from_str(&text)?)
    }
}

fn classify(error: reqwest::Error, operation: &'static str, after: Duration) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout { operation, after }
    } else {
        GenerationError::Http(error)
    }
}

#[async_trait]
impl TextModel for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.config.text_model), err)]
    async fn complete_json(&self, system: &str, prompt: &str) -> Result<TextCompletion, GenerationError> {
        let body = json!({
            "model": self.config.text_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "response_format": {"type": "json_object"},
        });

        let response: ChatCompletionResponse = self
            .post("chat/completions", &body, self.config.text_timeout, "story text generation")
            .await?;
        let (content, model, usage) = response.into_content()?;

        Ok(TextCompletion {
            content,
            model: model.unwrap_or_else(|| self.config.text_model.clone()),
            prompt_tokens: usage.as_ref().map_or(0, |u| u.prompt_tokens),
            completion_tokens: usage.as_ref().map_or(0, |u| u.completion_tokens),
        })
    }
}

#[async_trait]
impl VisionModel for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.config.vision_model, bytes = image.data.len()), err)]
    async fn describe_image(&self, system: &str, prompt: &str, image: ImageInput<'_>) -> Result<String, GenerationError> {
        let data_url = format!("data:{};base64,{}", image.content_type, STANDARD.encode(image.data));
        let body = json!({
            "model": self.config.vision_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": data_url, "detail": "low"}},
                ]},
            ],
            "max_tokens": self.config.vision_max_tokens,
        });

        let response: ChatCompletionResponse = self
            .post("chat/completions", &body, self.config.vision_timeout, "photo description")
            .await?;
        Ok(response.into_content()?.0)
    }
}

#[async_trait]
impl ImageModel for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.config.image_model), err)]
    async fn generate_image(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.config.image_model,
            "prompt": prompt,
            "n": 1,
            "size": self.config.image_size,
            "quality": self.config.image_quality,
            "style": self.config.image_style,
            "response_format": "url",
        });

        let response: ImageGenerationResponse = self
            .post("images/generations", &body, self.config.image_timeout, "scene illustration")
            .await?;

        response
            .data
            .into_iter()
            .next()
            .and_then(|image| image.url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GenerationError::MalformedResponse("image response has no URL".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::install_crypto_provider;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAiClient {
        install_crypto_provider();
        OpenAiClient::new(GenerationConfig {
            base_url: Url::parse(&format!("{}/v1", server.uri())).unwrap(),
            api_key: Some("test-key".to_string()),
            text_timeout: Duration::from_millis(500),
            image_timeout: Duration::from_millis(500),
            vision_timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap()
    }

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 412, "completion_tokens": 733, "total_tokens": 1145}
        })
    }

    #[test]
    fn test_ensure_slash() {
        let url = Url::parse("https://api.openai.com/v1").unwrap();
        assert_eq!(ensure_slash(&url).join("chat/completions").unwrap().as_str(), "https://api.openai.com/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_text_completion_requests_json_and_reports_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}, "model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(r#"{"title": "t"}"#)))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).complete_json("system", "prompt").await.unwrap();
        assert_eq!(result.content, r#"{"title": "t"}"#);
        assert_eq!(result.model, "gpt-4o-2024-08-06");
        assert_eq!(result.prompt_tokens, 412);
        assert_eq!(result.completion_tokens, 733);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client_for(&server).complete_json("system", "prompt").await.unwrap_err();
        match err {
            GenerationError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(json!({"data": [{"url": "https://img.example/1.png"}]})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).generate_image("a dragon").await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_image_generation_returns_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .and(body_partial_json(json!({"model": "dall-e-3", "n": 1, "size": "1024x1024"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "created": 1700000000,
                "data": [{"url": "https://img.example/scene-1.png", "revised_prompt": "..."}]
            })))
            .mount(&server)
            .await;

        let url = client_for(&server).generate_image("a brave child").await.unwrap();
        assert_eq!(url, "https://img.example/scene-1.png");
    }

    #[tokio::test]
    async fn test_vision_sends_inline_image() {
        let server = MockServer::start().await;
        let expected_url = format!("data:image/png;base64,{}", STANDARD.encode(b"png-bytes"));
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "max_tokens": 150,
                "messages": [
                    {"role": "system"},
                    {"role": "user", "content": [
                        {"type": "text"},
                        {"type": "image_url", "image_url": {"url": expected_url, "detail": "low"}}
                    ]}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  Curly brown hair and green eyes.  ")))
            .expect(1)
            .mount(&server)
            .await;

        let description = client_for(&server)
            .describe_image(
                "system",
                "describe",
                ImageInput {
                    content_type: "image/png",
                    data: b"png-bytes",
                },
            )
            .await
            .unwrap();
        assert_eq!(description, "Curly brown hair and green eyes.");
    }

    #[tokio::test]
    async fn test_empty_completion_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).complete_json("system", "prompt").await.unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }
}
