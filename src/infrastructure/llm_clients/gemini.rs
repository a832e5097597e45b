use super::LLMClient;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: String,
}

pub struct GeminiClient {
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn api_key(config: &LLMConfig) -> Result<String> {
        config.api_key.clone().ok_or_else(|| {
            AppError::ConfigurationError("Missing API key for Google provider".to_string())
        })
    }

    /// The key travels in the `x-goog-api-key` header, never in the URL, so
    /// transport errors that echo the URL cannot leak it.
    fn endpoint(config: &LLMConfig) -> String {
        let base_url = config.base_url.trim_end_matches('/');
        let model_id = config.model.trim().trim_start_matches("models/");
        format!("{}/{}:generateContent", base_url, model_id)
    }

    fn request_body(config: &LLMConfig, system: &str, user: &str) -> GeminiRequest {
        let parts = [system, user]
            .into_iter()
            .filter(|text| !text.trim().is_empty())
            .map(|text| GeminiPart {
                text: text.to_string(),
            })
            .collect();

        GeminiRequest {
            contents: vec![GeminiContent {
                parts,
                role: Some("user".to_string()),
            }],
            generation_config: Some(GenerationConfig {
                temperature: config.temperature.unwrap_or(0.7) as f64,
                max_output_tokens: config.max_tokens,
            }),
        }
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a non-success status to the error taxonomy. Only 503 is transient.
pub(crate) fn status_error(status: StatusCode, body: &str) -> AppError {
    if status == StatusCode::SERVICE_UNAVAILABLE {
        AppError::LLMOverloaded(format!("API error ({}): {}", status, body))
    } else {
        AppError::LLMError(format!("API error ({}): {}", status, body))
    }
}

fn extract_text(response: GeminiResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AppError::LLMError("Invalid response format".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl LLMClient for GeminiClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String> {
        let api_key = Self::api_key(config)?;
        let url = Self::endpoint(config);
        let body = Self::request_body(config, system, user);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LLMError(format!("Request failed: {}", e.without_url())))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let json: GeminiResponse = response
            .json()
            .await
            .map_err(|e| {
                AppError::LLMError(format!("Failed to parse JSON: {}", e.without_url()))
            })?;

        extract_text(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_unavailable_is_overloaded() {
        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, "model is overloaded");
        assert!(err.is_overloaded());

        let err = status_error(StatusCode::BAD_REQUEST, "bad prompt");
        assert!(matches!(err, AppError::LLMError(_)));
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let config = LLMConfig::default();
        assert!(matches!(
            GeminiClient::api_key(&config),
            Err(AppError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_endpoint_strips_models_prefix() {
        let config = LLMConfig {
            model: "models/gemini-1.5-flash".to_string(),
            ..LLMConfig::default()
        };
        assert_eq!(
            GeminiClient::endpoint(&config),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_transport_error_does_not_expose_api_key() {
        let config = LLMConfig {
            base_url: "http://127.0.0.1:9/v1beta/models".to_string(),
            api_key: Some("SUPERSECRETKEY".to_string()),
            ..LLMConfig::default()
        };

        let err = GeminiClient::new()
            .generate(&config, "", "hi")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::LLMError(_)));
        assert!(!err.to_string().contains("SUPERSECRETKEY"));
        assert!(!err.to_string().contains("key="));
    }

    #[test]
    fn test_request_body_skips_blank_system_prompt() {
        let body = GeminiClient::request_body(&LLMConfig::default(), "  ", "Write it");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Join "}, {"text": "us"}]}}]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Join us");

        let empty: GeminiResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).unwrap();
        assert!(extract_text(empty).is_err());
    }
}
