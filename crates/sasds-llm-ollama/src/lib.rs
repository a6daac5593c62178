use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use sasds_llm::{CompletionRequest, LlmClient};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Local models can take a while on the first request after loading.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);
const ERROR_BODY_LIMIT: usize = 200;

/// Blocking client for a local Ollama daemon.
#[derive(Clone)]
pub struct OllamaClient {
    pub base_url: String,
    pub temperature: f32,
    probe_http: Client,
    completion_http: Client,
}

impl OllamaClient {
    pub fn new(base_url: String) -> Result<Self> {
        let probe_http = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("failed building Ollama probe client")?;
        let completion_http = Client::builder()
            .timeout(COMPLETION_TIMEOUT)
            .build()
            .context("failed building Ollama completion client")?;
        Ok(Self {
            base_url,
            temperature: 0.7,
            probe_http,
            completion_http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url.trim_end_matches('/'))
    }

    /// Lists installed models; any answer other than 2xx means the daemon is unusable.
    pub fn probe(&self) -> Result<()> {
        let url = self.endpoint("tags");
        let response = self
            .probe_http
            .get(&url)
            .send()
            .with_context(|| format!("Ollama is not listening at {url}"))?;
        if !response.status().is_success() {
            bail!("Ollama at {url} answered {}", response.status());
        }
        Ok(())
    }

    pub fn is_reachable(&self) -> bool {
        match self.probe() {
            Ok(()) => true,
            Err(err) => {
                debug!("ollama probe failed: {err:#}");
                false
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

fn clipped(body: &str) -> String {
    let mut out: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
    if body.trim().chars().count() > ERROR_BODY_LIMIT {
        out.push_str("...");
    }
    out
}

impl LlmClient for OllamaClient {
    fn complete(&self, req: &CompletionRequest, model: &str) -> Result<String> {
        let url = self.endpoint("generate");
        debug!(%url, model, purpose = %req.purpose, "requesting ollama completion");
        let response = self
            .completion_http
            .post(&url)
            .json(&GenerateRequest {
                model,
                system: &req.system,
                prompt: &req.prompt,
                stream: false,
                options: GenerateOptions {
                    temperature: self.temperature,
                },
            })
            .send()
            .with_context(|| format!("failed calling Ollama at {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "Ollama rejected `{}` for model `{model}` ({status}): {}",
                req.purpose,
                clipped(&body)
            );
        }

        let parsed: GenerateResponse = response
            .json()
            .with_context(|| format!("Ollama model `{model}` sent an undecodable reply"))?;
        if parsed.response.trim().is_empty() {
            bail!("Ollama model `{model}` returned an empty completion");
        }
        Ok(parsed.response)
    }
}
