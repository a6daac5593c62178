//! Prompt-driven pipeline stages (analyze, generate, review), each with a
//! deterministic local computation used whenever the model path fails.

pub mod analyzer;
pub mod cache;
pub mod generator;
pub mod reviewer;

use anyhow::Result;
use cache::{CompletionCache, cache_key};
use sasds_llm::{CompletionRequest, CompletionService, Provider, ProviderSelection};
use tracing::{debug, warn};

pub use analyzer::{Analysis, RequirementAnalyzer, attach_file, fallback_analysis};
pub use cache::FileCompletionCache;
pub use generator::{CodeGenerator, GeneratedCode, Language};
pub use reviewer::{ReviewReport, ReviewSubject, Reviewer};

pub const PROMPT_VERSION: &str = "sasds-v1";

/// A pipeline step that can be computed by a model or locally.
pub trait Stage {
    type Input: ?Sized;
    type Output;

    /// Stage name used in logs and cache keys.
    const PURPOSE: &'static str;

    fn request(&self, input: &Self::Input) -> CompletionRequest;

    /// Turns a raw model reply into the stage output. An error sends the
    /// stage to its local computation.
    fn interpret(&self, reply: &str, input: &Self::Input) -> Result<Self::Output>;

    /// Deterministic result that never fails.
    fn local(&self, input: &Self::Input) -> Self::Output;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSource {
    Remote {
        provider: Provider,
        model: String,
        cache_hit: bool,
    },
    /// `reason` is `None` when no model was configured at all.
    Fallback { reason: Option<String> },
}

impl StageSource {
    pub fn describe(&self) -> String {
        match self {
            StageSource::Remote {
                provider,
                model,
                cache_hit,
            } => format!("{}:{} (cache_hit={cache_hit})", provider.as_str(), model),
            StageSource::Fallback { reason: None } => "local rules".to_string(),
            StageSource::Fallback {
                reason: Some(reason),
            } => format!("local rules (model unavailable: {reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome<T> {
    pub value: T,
    pub source: StageSource,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStrategy;

impl LocalStrategy {
    pub fn process<St: Stage>(&self, stage: &St, input: &St::Input) -> StageOutcome<St::Output> {
        StageOutcome {
            value: stage.local(input),
            source: StageSource::Fallback { reason: None },
        }
    }
}

pub struct RemoteStrategy<S, C>
where
    S: CompletionService,
    C: CompletionCache,
{
    pub service: S,
    pub cache: C,
    pub selection: ProviderSelection,
    pub model_override: Option<String>,
    pub no_cache: bool,
}

impl<S, C> RemoteStrategy<S, C>
where
    S: CompletionService,
    C: CompletionCache,
{
    /// One model call; any failure is answered by [`LocalStrategy`].
    pub fn process<St: Stage>(&self, stage: &St, input: &St::Input) -> StageOutcome<St::Output> {
        match self.try_process(stage, input) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(stage = St::PURPOSE, "model path failed, using local rules: {err:#}");
                let local = LocalStrategy.process(stage, input);
                StageOutcome {
                    value: local.value,
                    source: StageSource::Fallback {
                        reason: Some(format!("{err:#}")),
                    },
                }
            }
        }
    }

    fn try_process<St: Stage>(
        &self,
        stage: &St,
        input: &St::Input,
    ) -> Result<StageOutcome<St::Output>> {
        let request = stage.request(input);

        if !self.no_cache {
            for candidate in self.service.candidate_chain(self.selection) {
                let model = self
                    .model_override
                    .as_deref()
                    .unwrap_or(&candidate.model);
                let key = cache_key(&request, candidate.provider, model);
                let Some(cached) = self.cache.get(&key) else {
                    continue;
                };
                match stage.interpret(&cached.text, input) {
                    Ok(value) => {
                        debug!(stage = St::PURPOSE, "completion cache hit");
                        return Ok(StageOutcome {
                            value,
                            source: StageSource::Remote {
                                provider: cached.provider,
                                model: cached.model,
                                cache_hit: true,
                            },
                        });
                    }
                    Err(err) => {
                        debug!(stage = St::PURPOSE, "ignoring unusable cache entry: {err:#}")
                    }
                }
            }
        }

        let response =
            self.service
                .complete(self.selection, &request, self.model_override.as_deref())?;
        let value = stage.interpret(&response.text, input)?;

        if !self.no_cache {
            let key = cache_key(&request, response.provider, &response.model);
            if let Err(err) = self.cache.put(&key, &response) {
                warn!("failed writing completion cache: {err:#}");
            }
        }

        Ok(StageOutcome {
            value,
            source: StageSource::Remote {
                provider: response.provider,
                model: response.model,
                cache_hit: false,
            },
        })
    }
}

/// Model-or-local dispatch, chosen once at construction.
pub enum Strategy<S, C>
where
    S: CompletionService,
    C: CompletionCache,
{
    Remote(RemoteStrategy<S, C>),
    Local(LocalStrategy),
}

impl<S, C> Strategy<S, C>
where
    S: CompletionService,
    C: CompletionCache,
{
    pub fn process<St: Stage>(&self, stage: &St, input: &St::Input) -> StageOutcome<St::Output> {
        match self {
            Strategy::Remote(remote) => remote.process(stage, input),
            Strategy::Local(local) => local.process(stage, input),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Strategy::Remote(_))
    }
}
