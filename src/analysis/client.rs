use super::prompts::{review_user_prompt, REVIEW_SYSTEM};
use super::{AnalysisError, AnalysisRequest, AnalysisResult, Analyzer};
use crate::config::Config;
use crate::keyring::{CredentialStore, API_KEY};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Chat-completion client for OpenAI-compatible endpoints.
///
/// One POST per analysis, no retries: a failed request is reported for that
/// cycle and the next edit produces a fresh one.
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    credentials: Arc<dyn CredentialStore>,
    /// Plaintext key from an old config that could not be moved to the keychain
    legacy_key: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

impl ChatClient {
    pub fn new(config: &Config, credentials: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            credentials,
            legacy_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    /// Send one system + user exchange and return the reply text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, AnalysisError> {
        let api_key = self
            .credentials
            .get(API_KEY)
            .or_else(|| self.legacy_key.clone())
            .ok_or_else(|| {
                AnalysisError::Configuration(
                    "No API key configured. Run 'cobra setup' or set OPENAI_API_KEY.".to_string(),
                )
            })?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "sending analysis request");
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error(&e))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "analysis service returned an error");
            return Err(AnalysisError::Service {
                status: Some(status.as_u16()),
                message: describe_status(status.as_u16(), &text),
            });
        }

        parse_completion(&text)
    }
}

impl Analyzer for ChatClient {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> BoxFuture<'a, Result<AnalysisResult, AnalysisError>> {
        Box::pin(async move {
            let narrative = self
                .complete(REVIEW_SYSTEM, &review_user_prompt(request))
                .await?;
            Ok(AnalysisResult::from_narrative(narrative))
        })
    }
}

fn transport_error(err: &reqwest::Error) -> AnalysisError {
    let message = if err.is_timeout() {
        "Analysis request timed out.".to_string()
    } else if err.is_connect() {
        format!("Couldn't reach the analysis service: {}", err)
    } else {
        format!("Analysis request failed: {}", err)
    };
    AnalysisError::service(message)
}

/// Pull `choices[0].message.content` out of a success body.
fn parse_completion(body: &str) -> Result<String, AnalysisError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        AnalysisError::service(format!(
            "Failed to parse analysis response: {} ({})",
            e,
            truncate_str(body, 120)
        ))
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| AnalysisError::service("Analysis service returned an empty response."))
}

fn describe_status(status: u16, body: &str) -> String {
    match status {
        401 => "Invalid API key. Run 'cobra setup' to update it.".to_string(),
        429 => "Rate limited by the analysis service. Keep typing; the next edit will retry."
            .to_string(),
        500..=599 => format!(
            "Analysis service error ({}). The service may be temporarily unavailable.",
            status
        ),
        _ => format!("API error {}: {}", status, truncate_str(body, 200)),
    }
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::MemoryStore;

    fn client_with(store: MemoryStore, endpoint: &str) -> ChatClient {
        let config = Config {
            endpoint: endpoint.to_string(),
            request_timeout_secs: 2,
            ..Config::default()
        };
        ChatClient::new(&config, Arc::new(store)).unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
            temperature: 0.5,
        };
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert_eq!(json["temperature"], 0.5);
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Line 2: off by one"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "Line 2: off by one");
    }

    #[test]
    fn test_parse_completion_empty_or_broken() {
        assert!(parse_completion(r#"{"choices":[]}"#).is_err());
        assert!(parse_completion(r#"{"choices":[{"message":{"content":null}}]}"#).is_err());
        let err = parse_completion("<html>").unwrap_err();
        assert!(matches!(err, AnalysisError::Service { status: None, .. }));
    }

    #[test]
    fn test_describe_status() {
        assert!(describe_status(401, "").contains("Invalid API key"));
        assert!(describe_status(429, "").contains("Rate limited"));
        assert!(describe_status(503, "").contains("503"));
        assert!(describe_status(400, "bad model").contains("bad model"));
    }

    #[test]
    fn test_truncate_str_is_char_safe() {
        assert_eq!(truncate_str("héllo", 2), "hé");
        assert_eq!(truncate_str("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let client = client_with(MemoryStore::new(), "http://127.0.0.1:9/v1/chat/completions");
        let request = AnalysisRequest {
            code: "x = 1".to_string(),
            problem_id: "two-sum".to_string(),
        };
        let err = client.analyze(&request).await.unwrap_err();
        assert!(err.is_persistent());
    }

    #[tokio::test]
    async fn test_legacy_config_key_is_a_fallback() {
        let config = Config {
            api_key: Some("sk-legacy".to_string()),
            endpoint: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            request_timeout_secs: 2,
            ..Config::default()
        };
        let client = ChatClient::new(&config, Arc::new(MemoryStore::new())).unwrap();
        // Gets past the credential check and fails on transport instead
        let err = client.complete("system", "user").await.unwrap_err();
        assert!(!err.is_persistent());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_service_error() {
        let client = client_with(
            MemoryStore::with(API_KEY, "sk-test"),
            "http://127.0.0.1:9/v1/chat/completions",
        );
        let err = client.complete("system", "user").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Service { status: None, .. }));
    }
}
