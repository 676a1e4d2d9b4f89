//! Google Gemini generation provider.
//!
//! Sends single-turn prompts to the `generateContent` endpoint and returns the
//! concatenated text parts. Auth is via the `?key=` query parameter. When the
//! caller expects JSON, the request asks for `application/json` output.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{
    GenerationRequest, GenerationResponse, Provider, ResponseFormat, map_send_error, retry_after_secs,
};
use crate::config::GenerationConfig;
use crate::error::{ConfigError, ProviderError};

/// The default Google Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    name: String,
    temperature: f32,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig, model: &str, api_key: String) -> Result<Self, ConfigError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            name: format!("gemini:{}", model),
            temperature: config.temperature,
        })
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    fn build_request_body(&self, request: &GenerationRequest) -> Value {
        let mut generation_config = json!({ "temperature": self.temperature });
        if request.format == ResponseFormat::Json {
            generation_config["responseMimeType"] = json!("application/json");
        }
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }],
            }],
            "generationConfig": generation_config,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<GenerationResponse, ProviderError> {
        let schema_error = |message: &str| ProviderError::SchemaParse {
            provider: self.name.clone(),
            message: message.to_string(),
        };

        let candidate = body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| schema_error("missing or empty 'candidates' array"))?;

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = candidate["finishReason"].as_str().unwrap_or("UNKNOWN");
            return Err(ProviderError::NonRetryable {
                provider: self.name.clone(),
                message: format!("empty completion (finish reason {})", reason),
            });
        }

        Ok(GenerationResponse {
            text,
            model: body["modelVersion"]
                .as_str()
                .unwrap_or(&self.model)
                .to_string(),
        })
    }

    fn map_http_error(
        &self,
        status: reqwest::StatusCode,
        retry_after: Option<u64>,
        body_text: &str,
    ) -> ProviderError {
        match status.as_u16() {
            429 => ProviderError::QuotaExceeded {
                provider: self.name.clone(),
                retry_after_secs: retry_after,
            },
            500..=599 => ProviderError::Transient {
                provider: self.name.clone(),
                message: format!("HTTP {}", status),
            },
            _ => ProviderError::NonRetryable {
                provider: self.name.clone(),
                message: format!("HTTP {} from Gemini API: {}", status, truncate(body_text, 300)),
            },
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Provider<GenerationRequest, GenerationResponse> for GeminiGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let body = self.build_request_body(request);
        debug!(
            model = self.model.as_str(),
            purpose = ?request.purpose,
            "Sending Gemini generation request"
        );

        let response = self
            .client
            .post(self.endpoint_url())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(&self.name, e))?;

        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let body_text = response
            .text()
            .await
            .map_err(|e| map_send_error(&self.name, e))?;

        if !status.is_success() {
            return Err(self.map_http_error(status, retry_after, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| ProviderError::SchemaParse {
                provider: self.name.clone(),
                message: format!("Invalid JSON in response: {}", e),
            })?;

        self.parse_response(&response_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::GenerationPurpose;

    fn generator() -> GeminiGenerator {
        GeminiGenerator::new(&GenerationConfig::default(), "gemini-2.0-flash", "k3y".into()).unwrap()
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            generator().endpoint_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent?key=k3y"
        );
    }

    #[test]
    fn test_json_requests_set_mime_type() {
        let g = generator();
        let body = g.build_request_body(&GenerationRequest::new(
            GenerationPurpose::Intent,
            ResponseFormat::Json,
            "extract",
        ));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "extract");

        let body = g.build_request_body(&GenerationRequest::new(
            GenerationPurpose::Narrative,
            ResponseFormat::Text,
            "write",
        ));
        assert!(body["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn test_parse_response_joins_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] },
                "finishReason": "STOP"
            }],
            "modelVersion": "gemini-2.0-flash-001"
        });
        let response = generator().parse_response(&body).unwrap();
        assert_eq!(response.text, "Hello world");
        assert_eq!(response.model, "gemini-2.0-flash-001");
    }

    #[test]
    fn test_parse_response_errors() {
        let g = generator();
        assert!(matches!(
            g.parse_response(&json!({})),
            Err(ProviderError::SchemaParse { .. })
        ));
        let blocked = json!({ "candidates": [{ "content": { "parts": [] }, "finishReason": "SAFETY" }] });
        match g.parse_response(&blocked) {
            Err(ProviderError::NonRetryable { message, .. }) => assert!(message.contains("SAFETY")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_http_error_mapping() {
        let g = generator();
        assert!(matches!(
            g.map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, Some(7), ""),
            ProviderError::QuotaExceeded { retry_after_secs: Some(7), .. }
        ));
        assert!(g
            .map_http_error(reqwest::StatusCode::SERVICE_UNAVAILABLE, None, "")
            .is_retryable());
        assert!(matches!(
            g.map_http_error(reqwest::StatusCode::FORBIDDEN, None, "denied"),
            ProviderError::NonRetryable { .. }
        ));
    }
}
