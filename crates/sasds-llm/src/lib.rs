use anyhow::{Result, anyhow};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAiCompatible,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAiCompatible => "openai-compatible",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSelection {
    Auto,
    Ollama,
    OpenAiCompatible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub provider: Provider,
    pub model: String,
}

/// One prompt for one pipeline stage. `purpose` names the stage in logs and
/// cache keys ("analyze", "generate", "review").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub purpose: String,
    pub system: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
    pub provider: Provider,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: Provider,
    pub stage: &'static str,
    pub error: String,
}

#[derive(Debug, Error)]
#[error("LLM routing failed after {attempts:?}")]
pub struct ProviderRoutingError {
    pub attempts: Vec<ProviderAttempt>,
}

pub trait LlmClient {
    fn complete(&self, req: &CompletionRequest, model: &str) -> Result<String>;
}

pub trait ReachabilityProbe {
    fn ollama_reachable(&self) -> bool;
}

pub trait CompletionService {
    fn candidate_chain(&self, selection: ProviderSelection) -> Vec<ProviderDescriptor>;
    fn complete(
        &self,
        selection: ProviderSelection,
        req: &CompletionRequest,
        model_override: Option<&str>,
    ) -> Result<CompletionResponse>;
}

/// Removes a leading ```` ```lang ```` line and a trailing ```` ``` ```` line.
/// Text that does not start with a fence is only trimmed.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let body = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => "",
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}

/// Normalizes a reply that is expected to be source code.
pub fn normalize_code_reply(raw: &str) -> Result<String> {
    if raw.trim().is_empty() {
        return Err(anyhow!("LLM returned empty output"));
    }

    let code = strip_code_fences(raw);
    if code.is_empty() {
        return Err(anyhow!("LLM returned empty fenced output"));
    }
    Ok(code)
}

/// The substring from the first `{` to the last `}`, if any.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

pub struct ProviderRouter<O, P, R>
where
    O: LlmClient,
    P: LlmClient,
    R: ReachabilityProbe,
{
    pub ollama: O,
    pub openai: P,
    pub reachability: R,
    pub ollama_model: String,
    pub openai_model: String,
}

impl<O, P, R> ProviderRouter<O, P, R>
where
    O: LlmClient,
    P: LlmClient,
    R: ReachabilityProbe,
{
    fn call_provider(
        &self,
        provider: Provider,
        req: &CompletionRequest,
        model_override: Option<&str>,
    ) -> Result<CompletionResponse> {
        let (text, model) = match provider {
            Provider::Ollama => {
                let model = model_override.unwrap_or(&self.ollama_model);
                (self.ollama.complete(req, model)?, model)
            }
            Provider::OpenAiCompatible => {
                let model = model_override.unwrap_or(&self.openai_model);
                (self.openai.complete(req, model)?, model)
            }
        };
        if text.trim().is_empty() {
            return Err(anyhow!("LLM returned empty output"));
        }

        Ok(CompletionResponse {
            text,
            provider,
            model: model.to_string(),
        })
    }
}

impl<O, P, R> CompletionService for ProviderRouter<O, P, R>
where
    O: LlmClient,
    P: LlmClient,
    R: ReachabilityProbe,
{
    fn candidate_chain(&self, selection: ProviderSelection) -> Vec<ProviderDescriptor> {
        let ollama = ProviderDescriptor {
            provider: Provider::Ollama,
            model: self.ollama_model.clone(),
        };
        let openai = ProviderDescriptor {
            provider: Provider::OpenAiCompatible,
            model: self.openai_model.clone(),
        };

        match selection {
            ProviderSelection::Ollama => vec![ollama],
            ProviderSelection::OpenAiCompatible => vec![openai],
            ProviderSelection::Auto => {
                if self.reachability.ollama_reachable() {
                    vec![ollama, openai]
                } else {
                    vec![openai]
                }
            }
        }
    }

    fn complete(
        &self,
        selection: ProviderSelection,
        req: &CompletionRequest,
        model_override: Option<&str>,
    ) -> Result<CompletionResponse> {
        let chain = self.candidate_chain(selection);
        let mut attempts = Vec::new();

        for entry in chain {
            debug!(
                provider = entry.provider.as_str(),
                purpose = %req.purpose,
                "calling provider"
            );
            match self.call_provider(entry.provider, req, model_override) {
                Ok(response) => return Ok(response),
                Err(err) => attempts.push(ProviderAttempt {
                    provider: entry.provider,
                    stage: "complete",
                    error: err.to_string(),
                }),
            }
        }

        Err(ProviderRoutingError { attempts }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CompletionRequest, CompletionService, LlmClient, Provider, ProviderDescriptor,
        ProviderRouter, ProviderRoutingError, ProviderSelection, ReachabilityProbe,
        extract_json_object, normalize_code_reply, strip_code_fences,
    };
    use anyhow::{Result, anyhow};

    struct StubClient {
        fail: bool,
        output: String,
    }

    impl LlmClient for StubClient {
        fn complete(&self, _req: &CompletionRequest, _model: &str) -> Result<String> {
            if self.fail {
                return Err(anyhow!("stub failure"));
            }
            Ok(self.output.clone())
        }
    }

    struct Probe(bool);

    impl ReachabilityProbe for Probe {
        fn ollama_reachable(&self) -> bool {
            self.0
        }
    }

    fn req() -> CompletionRequest {
        CompletionRequest {
            purpose: "generate".to_string(),
            system: "You write Python.".to_string(),
            prompt: "print hello".to_string(),
        }
    }

    fn router(
        ollama: StubClient,
        openai: StubClient,
        reachable: bool,
    ) -> ProviderRouter<StubClient, StubClient, Probe> {
        ProviderRouter {
            ollama,
            openai,
            reachability: Probe(reachable),
            ollama_model: "ollama-model".to_string(),
            openai_model: "openai-model".to_string(),
        }
    }

    fn ok(output: &str) -> StubClient {
        StubClient {
            fail: false,
            output: output.to_string(),
        }
    }

    fn failing() -> StubClient {
        StubClient {
            fail: true,
            output: String::new(),
        }
    }

    #[test]
    fn strips_fence() {
        let out = normalize_code_reply("```python\nprint(1)\n```").expect("normalize should pass");
        assert_eq!(out, "print(1)");
    }

    #[test]
    fn unfenced_text_is_only_trimmed() {
        assert_eq!(strip_code_fences("  x = 1\n"), "x = 1");
    }

    #[test]
    fn unterminated_fence_keeps_body() {
        assert_eq!(strip_code_fences("```py\ndef main():\n    pass"), "def main():\n    pass");
    }

    #[test]
    fn rejects_empty() {
        let err = normalize_code_reply("  ").expect_err("must fail");
        assert!(err.to_string().contains("empty"));

        let err = normalize_code_reply("```\n```").expect_err("must fail");
        assert!(err.to_string().contains("empty fenced"));
    }

    #[test]
    fn json_object_spans_first_to_last_brace() {
        let raw = "Sure! Here it is:\n{\"tasks\": [\"a\"], \"extra\": {\"k\": 1}}\nThanks";
        assert_eq!(
            extract_json_object(raw),
            Some("{\"tasks\": [\"a\"], \"extra\": {\"k\": 1}}")
        );
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn auto_prefers_ollama_when_reachable() {
        let router = router(ok("1"), ok("2"), true);
        let chain = router.candidate_chain(ProviderSelection::Auto);
        assert_eq!(chain[0].provider, Provider::Ollama);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn auto_skips_unreachable_ollama() {
        let router = router(ok("1"), ok("2"), false);
        let chain = router.candidate_chain(ProviderSelection::Auto);
        assert_eq!(
            chain,
            vec![ProviderDescriptor {
                provider: Provider::OpenAiCompatible,
                model: "openai-model".to_string()
            }]
        );
    }

    #[test]
    fn auto_falls_back_to_openai_on_ollama_failure() {
        let router = router(failing(), ok("3"), true);
        let response = router
            .complete(ProviderSelection::Auto, &req(), None)
            .expect("fallback should work");
        assert_eq!(response.provider, Provider::OpenAiCompatible);
        assert_eq!(response.text, "3");
        assert_eq!(response.model, "openai-model");
    }

    #[test]
    fn empty_reply_counts_as_failed_attempt() {
        let router = router(ok("   "), ok("print(2)"), true);
        let response = router
            .complete(ProviderSelection::Auto, &req(), None)
            .expect("openai should answer");
        assert_eq!(response.provider, Provider::OpenAiCompatible);
    }

    #[test]
    fn model_override_applies_to_every_candidate() {
        let router = router(ok("x"), ok("y"), true);
        let response = router
            .complete(ProviderSelection::Ollama, &req(), Some("custom"))
            .expect("ollama should answer");
        assert_eq!(response.model, "custom");
    }

    #[test]
    fn exhausted_chain_reports_every_attempt() {
        let router = router(failing(), failing(), true);
        let err = router
            .complete(ProviderSelection::Auto, &req(), None)
            .expect_err("all providers fail");
        let routing = err
            .downcast_ref::<ProviderRoutingError>()
            .expect("routing error should be preserved");
        assert_eq!(routing.attempts.len(), 2);
        assert_eq!(routing.attempts[0].provider, Provider::Ollama);
        assert!(routing.attempts[1].error.contains("stub failure"));
    }
}
