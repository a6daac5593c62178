use anyhow::{Result, anyhow};
use sasds_agents::{FileCompletionCache, LocalStrategy, RemoteStrategy, Strategy};
use sasds_config::{
    CliRunOverrides, EnvConfig, ProgressSetting, ProviderSetting, RunDefaults, load_file_config,
    resolve_run_defaults,
};
use sasds_core::{Pipeline, ProgressMode};
use sasds_llm::{CompletionRequest, LlmClient, ProviderRouter, ProviderSelection, ReachabilityProbe};
use sasds_llm_ollama::OllamaClient;
use sasds_llm_openai::OpenAiCompatibleClient;
use sasds_validator::{ExecutorConfig, PytestValidator};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub(crate) struct OllamaProbe {
    client: OllamaClient,
}

type SasdsProviderRouter = ProviderRouter<OllamaClient, MaybeOpenAiClient, OllamaProbe>;
pub(crate) type SasdsPipeline =
    Pipeline<SasdsProviderRouter, FileCompletionCache, PytestValidator>;

impl ReachabilityProbe for OllamaProbe {
    fn ollama_reachable(&self) -> bool {
        self.client.is_reachable()
    }
}

pub(crate) struct MaybeOpenAiClient {
    inner: Option<OpenAiCompatibleClient>,
}

impl LlmClient for MaybeOpenAiClient {
    fn complete(&self, req: &CompletionRequest, model: &str) -> Result<String> {
        let client = self.inner.as_ref().ok_or_else(|| {
            anyhow!("OPENAI_API_KEY is required for OpenAI-compatible completion")
        })?;
        client.complete(req, model)
    }
}

fn provider_to_selection(provider: ProviderSetting) -> Option<ProviderSelection> {
    match provider {
        ProviderSetting::Auto => Some(ProviderSelection::Auto),
        ProviderSetting::Ollama => Some(ProviderSelection::Ollama),
        ProviderSetting::Openai => Some(ProviderSelection::OpenAiCompatible),
        ProviderSetting::None => None,
    }
}

pub(crate) fn resolved_progress_mode(progress: ProgressSetting, verbose: bool) -> ProgressMode {
    match progress {
        ProgressSetting::Silent => ProgressMode::Silent,
        ProgressSetting::Verbose => ProgressMode::Verbose,
        ProgressSetting::Auto => {
            if verbose {
                ProgressMode::Verbose
            } else {
                ProgressMode::Minimal
            }
        }
    }
}

pub(crate) fn resolve_config(
    config: Option<PathBuf>,
    cli_overrides: &CliRunOverrides,
) -> Result<RunDefaults> {
    let cwd = std::env::current_dir()?;
    let file_cfg = load_file_config(config.as_deref(), &cwd)?;
    let env_cfg = EnvConfig::from_current_env();
    Ok(resolve_run_defaults(
        cli_overrides,
        &env_cfg,
        file_cfg.as_ref(),
    ))
}

pub(crate) fn build_validator(resolved: &RunDefaults) -> PytestValidator {
    PytestValidator::new(ExecutorConfig::pytest(
        &resolved.python,
        Duration::from_secs(resolved.test_timeout_secs),
    ))
}

/// Picks the remote strategy only when some provider can plausibly answer.
pub(crate) fn build_strategy(
    resolved: &RunDefaults,
    model_override: Option<String>,
) -> Result<Strategy<SasdsProviderRouter, FileCompletionCache>> {
    let Some(selection) = provider_to_selection(resolved.provider) else {
        debug!("provider disabled; using local strategy");
        return Ok(Strategy::Local(LocalStrategy));
    };

    let ollama_client = OllamaClient::new(resolved.ollama_url.clone())?;
    if selection == ProviderSelection::Auto
        && resolved.openai_api_key.is_none()
        && !ollama_client.is_reachable()
    {
        debug!(
            ollama_url = %resolved.ollama_url,
            "no reachable provider; using local strategy"
        );
        return Ok(Strategy::Local(LocalStrategy));
    }

    let openai_client = MaybeOpenAiClient {
        inner: resolved.openai_api_key.clone().map(|api_key| {
            OpenAiCompatibleClient::from_parts(resolved.openai_base_url.clone(), api_key)
        }),
    };

    let router = ProviderRouter {
        ollama: ollama_client.clone(),
        openai: openai_client,
        reachability: OllamaProbe {
            client: ollama_client,
        },
        ollama_model: resolved.ollama_model.clone(),
        openai_model: resolved.openai_model.clone(),
    };

    Ok(Strategy::Remote(RemoteStrategy {
        service: router,
        cache: FileCompletionCache::default(),
        selection,
        model_override,
        no_cache: resolved.no_cache,
    }))
}

pub(crate) fn build_pipeline(
    resolved: &RunDefaults,
    model_override: Option<String>,
) -> Result<SasdsPipeline> {
    Ok(Pipeline::new(
        build_strategy(resolved, model_override)?,
        build_validator(resolved),
        resolved_progress_mode(resolved.progress, resolved.verbose),
    ))
}
