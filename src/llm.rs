//! "Complete a prompt, return text" clients for each LLM vendor.

use crate::aws_sigv4::{self, SignableRequest};
use crate::config::{ApiKeySettings, AwsCredentials, BedrockSettings};
use crate::error::{QueryError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const TEMPERATURE: f64 = 0.1;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String>;
}

async fn read_success(name: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!("{} API error ({}): {}", name, status, body);
    Err(QueryError::Llm(format!("{} API error: {}", name, status)))
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<MessagesContent>,
}

#[derive(Debug, Deserialize)]
struct MessagesContent {
    #[serde(default)]
    text: Option<String>,
}

impl MessagesResponse {
    fn into_text(self, name: &str) -> Result<String> {
        let text: String = self.content.into_iter().filter_map(|c| c.text).collect();
        if text.trim().is_empty() {
            return Err(QueryError::Llm(format!("No content in {} response", name)));
        }
        Ok(text)
    }
}

/// OpenAI chat-completions client.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(settings: &ApiKeySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": TEMPERATURE,
            "max_tokens": max_tokens
        });
        debug!("Sending chat completion to OpenAI model {}", self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Llm(format!("OpenAI API call failed: {}", e)))?;
        let response = read_success("OpenAI", response).await?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| QueryError::Llm(format!("Failed to parse OpenAI response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| QueryError::Llm("No content in OpenAI response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Anthropic messages API client authenticated with an explicit key.
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(settings: &ApiKeySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": TEMPERATURE
        });
        debug!("Sending messages request to Anthropic model {}", self.model);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryError::Llm(format!("Anthropic API call failed: {}", e)))?;
        let response = read_success("Anthropic", response).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Llm(format!("Failed to parse Anthropic response: {}", e)))?;
        parsed.into_text("Anthropic")
    }
}

/// Claude on Bedrock, signed with the account's own AWS credentials.
pub struct BedrockClient {
    client: reqwest::Client,
    region: String,
    model_id: String,
    credentials: AwsCredentials,
    endpoint: String,
}

impl BedrockClient {
    pub fn new(settings: &BedrockSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            region: settings.region.clone(),
            model_id: settings.model_id.clone(),
            credentials: settings.credentials.clone(),
            endpoint: settings
                .endpoint
                .clone()
                .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", settings.region)),
        }
    }
}

#[async_trait]
impl CompletionClient for BedrockClient {
    fn name(&self) -> &str {
        "bedrock"
    }

    async fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = serde_json::to_vec(&serde_json::json!({
            "anthropic_version": BEDROCK_ANTHROPIC_VERSION,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": TEMPERATURE
        }))?;

        let url = reqwest::Url::parse(&format!(
            "{}/model/{}/invoke",
            self.endpoint.trim_end_matches('/'),
            aws_sigv4::uri_encode(&self.model_id, true)
        ))
        .map_err(|e| QueryError::Config(format!("invalid Bedrock endpoint: {}", e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(QueryError::Config(format!("Bedrock endpoint has no host: {}", url)))
            }
        };

        let signed = aws_sigv4::sign(
            &self.credentials,
            &self.region,
            "bedrock",
            &SignableRequest {
                method: "POST",
                host: &host,
                path: url.path(),
                query: "",
                content_type: "application/json",
                body: &body,
            },
            chrono::Utc::now(),
        )?;
        debug!("Invoking Bedrock model {} in {}", self.model_id, self.region);

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        for (name, value) in signed {
            request = request.header(name, value);
        }
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| QueryError::Llm(format!("Bedrock API call failed: {}", e)))?;
        let response = read_success("Bedrock", response).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| QueryError::Llm(format!("Failed to parse Bedrock response: {}", e)))?;
        parsed.into_text("Bedrock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn key_settings(base_url: String) -> ApiKeySettings {
        ApiKeySettings {
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            base_url: Some(base_url),
        }
    }

    #[tokio::test]
    async fn test_openai_returns_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "{\"metric\": \"BlendedCost\"}"}}]}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(&key_settings(server.url()));
        let text = client.complete("system", "prompt", 100).await.unwrap();
        assert_eq!(text, r#"{"metric": "BlendedCost"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_openai_error_status_is_llm_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let client = OpenAiClient::new(&key_settings(server.url()));
        let err = client.complete("system", "prompt", 100).await.unwrap_err();
        assert!(matches!(err, QueryError::Llm(_)));
    }

    #[tokio::test]
    async fn test_anthropic_sends_version_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content": [{"type": "text", "text": "hello"}], "stop_reason": "end_turn"}"#)
            .create_async()
            .await;

        let client = AnthropicClient::new(&key_settings(server.url()));
        assert_eq!(client.complete("system", "prompt", 100).await.unwrap(), "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_anthropic_empty_content_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content": []}"#)
            .create_async()
            .await;

        let client = AnthropicClient::new(&key_settings(server.url()));
        assert!(client.complete("system", "prompt", 100).await.is_err());
    }

    #[tokio::test]
    async fn test_bedrock_request_is_signed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex(r"^/model/.+/invoke$".to_string()))
            .match_header("authorization", Matcher::Regex(r"^AWS4-HMAC-SHA256 Credential=AKIDTEST/".to_string()))
            .match_header("x-amz-date", Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content": [{"type": "text", "text": "signed"}]}"#)
            .create_async()
            .await;

        let client = BedrockClient::new(&BedrockSettings {
            region: "us-east-1".to_string(),
            model_id: "anthropic.claude-3-5-sonnet-20240620-v1:0".to_string(),
            credentials: AwsCredentials {
                access_key_id: "AKIDTEST".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
            endpoint: Some(server.url()),
        });
        assert_eq!(client.complete("system", "prompt", 100).await.unwrap(), "signed");
        mock.assert_async().await;
    }
}
