use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use sasds_llm::{CompletionRequest, LlmClient};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    pub base_url: String,
    pub api_key: String,
    pub temperature: f32,
}

impl OpenAiCompatibleClient {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY is required for OpenAI-compatible provider")?;

        Ok(Self::from_parts(base_url, api_key))
    }

    pub fn from_parts(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

fn chat_request(req: &CompletionRequest, model: &str, temperature: f32) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        temperature,
        messages: vec![
            Message {
                role: "system".to_string(),
                content: req.system.clone(),
            },
            Message {
                role: "user".to_string(),
                content: req.prompt.clone(),
            },
        ],
    }
}

fn first_choice_text(parsed: ChatResponse) -> Result<String> {
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("OpenAI-compatible response had no choices"))
}

impl LlmClient for OpenAiCompatibleClient {
    fn complete(&self, req: &CompletionRequest, model: &str) -> Result<String> {
        let body = chat_request(req, model, self.temperature);

        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .context("failed to build HTTP client")?;
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("failed calling OpenAI-compatible endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_else(|_| "<unavailable>".to_string());
            return Err(anyhow!(
                "OpenAI-compatible request failed ({status}): {body}"
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .context("failed to decode OpenAI-compatible response")?;
        first_choice_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatResponse, OpenAiCompatibleClient, chat_request, first_choice_text};
    use sasds_llm::{CompletionRequest, LlmClient};

    fn req() -> CompletionRequest {
        CompletionRequest {
            purpose: "analyze".to_string(),
            system: "You are a software architect.".to_string(),
            prompt: "Build a CSV analyzer".to_string(),
        }
    }

    #[test]
    fn request_has_system_then_user_message() {
        let body = chat_request(&req(), "gpt-4.1-mini", 0.7);
        assert_eq!(body.model, "gpt-4.1-mini");
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].content, "Build a CSV analyzer");
    }

    #[test]
    fn first_choice_content_is_returned() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#,
        )
        .expect("fixture should parse");
        assert_eq!(first_choice_text(parsed).expect("has content"), "ok");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[]}"#).expect("fixture should parse");
        let err = first_choice_text(parsed).expect_err("no choices");
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    #[ignore]
    fn live_openai_completion_if_enabled() {
        if std::env::var("SASDS_RUN_LIVE_TESTS").ok().as_deref() != Some("1") {
            return;
        }

        let client = match OpenAiCompatibleClient::from_env() {
            Ok(c) => c,
            Err(_) => return,
        };

        let model = std::env::var("SASDS_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());
        let out = client
            .complete(&req(), &model)
            .expect("openai live request should succeed");
        assert!(!out.trim().is_empty());
    }
}
