//! Gemini upstream client
//!
//! Thin wrapper around the generateContent endpoint. The base URL is
//! injectable so tests can point it at a local mock server.

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub total_tokens: i32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: i32,
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            model: "gemini-2.0-flash".to_string(),
        }
    }

    pub async fn generate(&self, prompt: &str) -> ApiResult<GenerationResult> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "generation failed with status {}",
                response.status()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| ApiError::Upstream("empty generation response".to_string()))?;

        let total_tokens = parsed
            .usage_metadata
            .map(|u| u.total_token_count)
            .unwrap_or(0);

        Ok(GenerationResult { text, total_tokens })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn test_generate_parses_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                "/v1beta/models/gemini-2.0-flash:generateContent",
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"Once upon a time"}]}}],"usageMetadata":{"totalTokenCount":42}}"#,
            )
            .create_async()
            .await;

        let client = GeminiClient::new("test-key".to_string(), server.url());
        let result = client.generate("tell me a story").await.unwrap();
        assert_eq!(result.text, "Once upon a time");
        assert_eq!(result.total_tokens, 42);
    }

    #[tokio::test]
    async fn test_upstream_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                "/v1beta/models/gemini-2.0-flash:generateContent",
            )
            .with_status(429)
            .with_body("{}")
            .create_async()
            .await;

        let client = GeminiClient::new("test-key".to_string(), server.url());
        let err = client.generate("hi").await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }
}
