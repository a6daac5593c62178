use crate::PROMPT_VERSION;
use anyhow::{Context, Result};
use sasds_llm::{CompletionRequest, CompletionResponse, Provider};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

pub trait CompletionCache {
    fn get(&self, key: &str) -> Option<CompletionResponse>;
    fn put(&self, key: &str, response: &CompletionResponse) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileCompletionCache {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedCompletion {
    text: String,
    provider: String,
    model: String,
    prompt_version: String,
}

impl FileCompletionCache {
    pub fn default_root() -> Result<PathBuf> {
        let home = dirs::home_dir().context("failed to resolve home directory")?;
        Ok(home.join(".sasds").join("cache").join("completions"))
    }

    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

impl Default for FileCompletionCache {
    fn default() -> Self {
        let root = Self::default_root().unwrap_or_else(|_| PathBuf::from(".sasds-cache"));
        Self { root }
    }
}

impl CompletionCache for FileCompletionCache {
    fn get(&self, key: &str) -> Option<CompletionResponse> {
        let path = self.root.join(format!("{key}.json"));
        let raw = fs::read_to_string(path).ok()?;
        let parsed: CachedCompletion = serde_json::from_str(&raw).ok()?;
        if parsed.prompt_version != PROMPT_VERSION {
            return None;
        }

        Some(CompletionResponse {
            text: parsed.text,
            provider: parse_provider(&parsed.provider)?,
            model: parsed.model,
        })
    }

    fn put(&self, key: &str, response: &CompletionResponse) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed creating cache dir {}", self.root.display()))?;
        let path = self.root.join(format!("{key}.json"));

        let payload = CachedCompletion {
            text: response.text.clone(),
            provider: response.provider.as_str().to_string(),
            model: response.model.clone(),
            prompt_version: PROMPT_VERSION.to_string(),
        };

        let raw =
            serde_json::to_string_pretty(&payload).context("failed serializing cache payload")?;
        fs::write(path, raw).context("failed writing cache file")?;
        Ok(())
    }
}

/// Hex sha256 over everything that can change a completion.
pub fn cache_key(request: &CompletionRequest, provider: Provider, model: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [
        PROMPT_VERSION,
        request.purpose.as_str(),
        provider.as_str(),
        model,
        request.system.as_str(),
        request.prompt.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0_u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn parse_provider(value: &str) -> Option<Provider> {
    match value {
        "ollama" => Some(Provider::Ollama),
        "openai-compatible" => Some(Provider::OpenAiCompatible),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{CompletionCache, FileCompletionCache, cache_key};
    use sasds_llm::{CompletionRequest, CompletionResponse, Provider};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            purpose: "analyze".to_string(),
            system: "be brief".to_string(),
            prompt: prompt.to_string(),
        }
    }

    #[test]
    fn key_depends_on_provider_model_and_prompt() {
        let base = cache_key(&request("a"), Provider::Ollama, "qwen");
        assert_eq!(base.len(), 64);
        assert_eq!(base, cache_key(&request("a"), Provider::Ollama, "qwen"));
        assert_ne!(base, cache_key(&request("b"), Provider::Ollama, "qwen"));
        assert_ne!(base, cache_key(&request("a"), Provider::OpenAiCompatible, "qwen"));
        assert_ne!(base, cache_key(&request("a"), Provider::Ollama, "llama"));
    }

    #[test]
    fn file_cache_round_trips_provider_and_model() {
        let temp = tempdir().expect("tempdir should work");
        let cache = FileCompletionCache::new(PathBuf::from(temp.path()));
        let response = CompletionResponse {
            text: "{\"tasks\": []}".to_string(),
            provider: Provider::OpenAiCompatible,
            model: "gpt-4.1-mini".to_string(),
        };

        assert!(cache.get("k").is_none());
        cache.put("k", &response).expect("put should work");
        assert_eq!(cache.get("k"), Some(response));
    }

    #[test]
    fn entries_from_another_prompt_version_are_ignored() {
        let temp = tempdir().expect("tempdir should work");
        fs::write(
            temp.path().join("old.json"),
            r#"{"text":"x","provider":"ollama","model":"qwen","prompt_version":"sasds-v0"}"#,
        )
        .expect("write should work");
        let cache = FileCompletionCache::new(PathBuf::from(temp.path()));
        assert!(cache.get("old").is_none());
    }
}
