use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Completion, CompletionRequest, CompletionService, Message};
use crate::error::{DisplayOrDebugGateway, Error, ErrorDetails};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API client for Anthropic models.
#[derive(Debug)]
pub struct AnthropicClient {
    http_client: Client,
    messages_url: Url,
    api_key: SecretString,
    model: String,
}

#[derive(Serialize)]
struct AnthropicRequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct AnthropicResponseBody {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicClient {
    /// `messages_url` is resolved and checked at config load, see `ModelConfig::messages_url`.
    pub fn new(
        http_client: Client,
        messages_url: Url,
        api_key: SecretString,
        model: String,
    ) -> Self {
        Self {
            http_client,
            messages_url,
            api_key,
            model,
        }
    }
}

fn unavailable(message: String, status_code: Option<reqwest::StatusCode>) -> Error {
    Error::new(ErrorDetails::CompletionUnavailable {
        message,
        status_code,
    })
}

#[async_trait]
impl CompletionService for AnthropicClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, Error> {
        let body = AnthropicRequestBody {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: &request.messages,
        };

        let response = self
            .http_client
            .post(self.messages_url.clone())
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                unavailable(
                    format!(
                        "Error sending request to Anthropic: {}",
                        DisplayOrDebugGateway::new(e)
                    ),
                    None,
                )
            })?;

        let status = response.status();
        let raw_response = response.text().await.map_err(|e| {
            unavailable(
                format!(
                    "Error reading response from Anthropic: {}",
                    DisplayOrDebugGateway::new(e)
                ),
                Some(status),
            )
        })?;

        if !status.is_success() {
            return Err(unavailable(
                format!("Anthropic returned {status}: {raw_response}"),
                Some(status),
            ));
        }

        let parsed: AnthropicResponseBody =
            serde_json::from_str(&raw_response).map_err(|e| {
                unavailable(
                    format!("Error parsing response from Anthropic: {e}"),
                    Some(status),
                )
            })?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            text,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AnthropicClient {
        AnthropicClient::new(
            Client::new(),
            Url::parse(&format!("{}/v1/messages", server.uri())).unwrap(),
            SecretString::from("sk-ant-test"),
            "claude-haiku-4-5-20250414".to_string(),
        )
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user("Refine these items")],
            temperature: 0.3,
            max_tokens: 4096,
        }
    }

    #[tokio::test]
    async fn test_complete_returns_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-haiku-4-5-20250414",
                "max_tokens": 4096,
                "messages": [{"role": "user", "content": "Refine these items"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_01",
                "type": "message",
                "content": [
                    {"type": "text", "text": "[{\"title\":"},
                    {"type": "text", "text": "\"x\"}]"}
                ],
                "usage": {"input_tokens": 812, "output_tokens": 1404}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = client_for(&server).complete(&request()).await.unwrap();
        assert_eq!(completion.text, "[{\"title\":\"x\"}]");
        assert_eq!(completion.input_tokens, 812);
        assert_eq!(completion.output_tokens, 1404);
    }

    #[tokio::test]
    async fn test_upstream_error_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request()).await.unwrap_err();
        assert!(err.is_completion_unavailable());
        match err.get_details() {
            ErrorDetails::CompletionUnavailable { status_code, .. } => {
                assert_eq!(status_code.map(|s| s.as_u16()), Some(529));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).complete(&request()).await.unwrap_err();
        assert!(err.is_completion_unavailable());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let client = AnthropicClient::new(
            Client::new(),
            Url::parse("http://127.0.0.1:9/v1/messages").unwrap(),
            SecretString::from("sk-ant-test"),
            "claude-haiku-4-5-20250414".to_string(),
        );
        let err = client.complete(&request()).await.unwrap_err();
        assert!(err.is_completion_unavailable());
    }
}
