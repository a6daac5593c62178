use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "sasds.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSetting {
    Auto,
    Ollama,
    Openai,
    /// Never call a model; every stage uses its local computation.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressSetting {
    Auto,
    Silent,
    Verbose,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub provider: Option<ProviderSetting>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub python: Option<String>,
    pub test_timeout_secs: Option<u64>,
    pub no_cache: Option<bool>,
    pub verbose: Option<bool>,
    pub progress: Option<ProgressSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvConfig {
    pub provider: Option<ProviderSetting>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub python: Option<String>,
    pub test_timeout_secs: Option<u64>,
    pub no_cache: Option<bool>,
    pub verbose: Option<bool>,
    pub progress: Option<ProgressSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliRunOverrides {
    pub provider: Option<ProviderSetting>,
    pub ollama_url: Option<String>,
    pub model: Option<String>,
    pub python: Option<String>,
    pub test_timeout_secs: Option<u64>,
    pub no_cache: Option<bool>,
    pub verbose: Option<bool>,
    pub no_progress: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDefaults {
    pub provider: ProviderSetting,
    pub ollama_url: String,
    pub ollama_model: String,
    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub python: String,
    pub test_timeout_secs: u64,
    pub no_cache: bool,
    pub verbose: bool,
    pub progress: ProgressSetting,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            provider: ProviderSetting::Auto,
            ollama_url: "http://127.0.0.1:11434".to_string(),
            ollama_model: "qwen2.5-coder:7b".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4.1-mini".to_string(),
            python: "python3".to_string(),
            test_timeout_secs: 30,
            no_cache: false,
            verbose: false,
            progress: ProgressSetting::Auto,
        }
    }
}

pub fn load_file_config(explicit_path: Option<&Path>, cwd: &Path) -> Result<Option<FileConfig>> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => {
            let candidate = cwd.join(CONFIG_FILE_NAME);
            if !candidate.exists() {
                return Ok(None);
            }
            candidate
        }
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading config file {}", path.display()))?;
    let parsed: FileConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing config file {}", path.display()))?;
    Ok(Some(parsed))
}

impl EnvConfig {
    pub fn from_current_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads every setting through `lookup`; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            provider: var("SASDS_PROVIDER").as_deref().and_then(parse_provider),
            ollama_url: var("SASDS_OLLAMA_URL"),
            ollama_model: var("SASDS_OLLAMA_MODEL"),
            openai_base_url: var("OPENAI_BASE_URL"),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_model: var("SASDS_MODEL"),
            python: var("SASDS_PYTHON"),
            test_timeout_secs: var("SASDS_TEST_TIMEOUT").and_then(|v| v.parse().ok()),
            no_cache: var("SASDS_NO_CACHE").as_deref().and_then(parse_bool),
            verbose: var("SASDS_VERBOSE").as_deref().and_then(parse_bool),
            progress: var("SASDS_PROGRESS").as_deref().and_then(parse_progress),
        }
    }
}

/// First layer that holds a value, highest precedence first.
fn layered<T, const N: usize>(layers: [Option<T>; N]) -> Option<T> {
    layers.into_iter().flatten().next()
}

/// Merges the layers with precedence CLI > environment > file > built-in.
pub fn resolve_run_defaults(
    cli: &CliRunOverrides,
    env_cfg: &EnvConfig,
    file_cfg: Option<&FileConfig>,
) -> RunDefaults {
    let base = RunDefaults::default();
    let file = file_cfg.cloned().unwrap_or_default();
    let env_cfg = env_cfg.clone();

    let progress = if cli.no_progress == Some(true) {
        ProgressSetting::Silent
    } else {
        layered([env_cfg.progress, file.progress]).unwrap_or(base.progress)
    };

    RunDefaults {
        provider: layered([cli.provider, env_cfg.provider, file.provider]).unwrap_or(base.provider),
        ollama_url: layered([cli.ollama_url.clone(), env_cfg.ollama_url, file.ollama_url])
            .unwrap_or(base.ollama_url),
        ollama_model: layered([cli.model.clone(), env_cfg.ollama_model, file.ollama_model])
            .unwrap_or(base.ollama_model),
        openai_base_url: layered([env_cfg.openai_base_url, file.openai_base_url])
            .unwrap_or(base.openai_base_url),
        openai_api_key: env_cfg.openai_api_key,
        openai_model: layered([cli.model.clone(), env_cfg.openai_model, file.openai_model])
            .unwrap_or(base.openai_model),
        python: layered([cli.python.clone(), env_cfg.python, file.python]).unwrap_or(base.python),
        test_timeout_secs: layered(
            [
                cli.test_timeout_secs,
                env_cfg.test_timeout_secs,
                file.test_timeout_secs,
            ]
            .map(|secs| secs.filter(|secs| *secs > 0)),
        )
        .unwrap_or(base.test_timeout_secs),
        no_cache: layered([cli.no_cache, env_cfg.no_cache, file.no_cache]).unwrap_or(base.no_cache),
        verbose: layered([cli.verbose, env_cfg.verbose, file.verbose]).unwrap_or(base.verbose),
        progress,
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_provider(input: &str) -> Option<ProviderSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ProviderSetting::Auto),
        "ollama" => Some(ProviderSetting::Ollama),
        "openai" | "openai-compatible" => Some(ProviderSetting::Openai),
        "none" | "off" | "local" => Some(ProviderSetting::None),
        _ => None,
    }
}

fn parse_progress(input: &str) -> Option<ProgressSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ProgressSetting::Auto),
        "silent" => Some(ProgressSetting::Silent),
        "verbose" => Some(ProgressSetting::Verbose),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CONFIG_FILE_NAME, CliRunOverrides, EnvConfig, FileConfig, ProgressSetting,
        ProviderSetting, RunDefaults, load_file_config, parse_provider, resolve_run_defaults,
    };
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn valid_config_parses() {
        let dir = tempdir().expect("tempdir should work");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"{"provider":"none","python":"/usr/bin/python3.12","test_timeout_secs":10}"#,
        )
        .expect("write should work");

        let parsed = load_file_config(None, dir.path())
            .expect("parse should work")
            .expect("file should exist");
        assert_eq!(parsed.provider, Some(ProviderSetting::None));
        assert_eq!(parsed.python.as_deref(), Some("/usr/bin/python3.12"));
        assert_eq!(parsed.test_timeout_secs, Some(10));
    }

    #[test]
    fn missing_default_file_is_not_an_error() {
        let dir = tempdir().expect("tempdir should work");
        let parsed = load_file_config(None, dir.path()).expect("lookup should work");
        assert!(parsed.is_none());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempdir().expect("tempdir should work");
        let path = dir.path().join("elsewhere.json");
        let err = load_file_config(Some(&path), dir.path()).expect_err("read should fail");
        assert!(format!("{err:#}").contains("failed reading config file"));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempdir().expect("tempdir should work");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{"unknown":1}"#).expect("write should work");

        let err = load_file_config(None, dir.path()).expect_err("parse should fail");
        assert!(format!("{err:#}").contains("unknown field"));
    }

    #[test]
    fn malformed_json_has_location() {
        let dir = tempdir().expect("tempdir should work");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "{\n  \"provider\":\n").expect("write should work");

        let err = load_file_config(None, dir.path()).expect_err("parse should fail");
        assert!(
            format!("{err:#}").contains("line") || format!("{err:#}").contains("column"),
            "expected location details, got: {err}"
        );
    }

    #[test]
    fn precedence_cli_env_file_defaults() {
        let file = FileConfig {
            provider: Some(ProviderSetting::Openai),
            progress: Some(ProgressSetting::Verbose),
            python: Some("file-python".to_string()),
            test_timeout_secs: Some(12),
            ..FileConfig::default()
        };

        let env_cfg = EnvConfig {
            provider: Some(ProviderSetting::Ollama),
            python: Some("env-python".to_string()),
            ..EnvConfig::default()
        };

        let cli = CliRunOverrides {
            provider: Some(ProviderSetting::None),
            no_progress: Some(true),
            ..CliRunOverrides::default()
        };

        let resolved = resolve_run_defaults(&cli, &env_cfg, Some(&file));
        assert_eq!(resolved.provider, ProviderSetting::None);
        assert_eq!(resolved.python, "env-python");
        assert_eq!(resolved.test_timeout_secs, 12);
        assert_eq!(resolved.progress, ProgressSetting::Silent);
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let cli = CliRunOverrides {
            test_timeout_secs: Some(0),
            ..CliRunOverrides::default()
        };
        let resolved = resolve_run_defaults(&cli, &EnvConfig::default(), None);
        assert_eq!(resolved.test_timeout_secs, RunDefaults::default().test_timeout_secs);
    }

    #[test]
    fn zero_timeout_defers_to_lower_layers() {
        let cli = CliRunOverrides {
            test_timeout_secs: Some(0),
            ..CliRunOverrides::default()
        };
        let file = FileConfig {
            test_timeout_secs: Some(45),
            ..FileConfig::default()
        };
        let resolved = resolve_run_defaults(&cli, &EnvConfig::default(), Some(&file));
        assert_eq!(resolved.test_timeout_secs, 45);

        let env_cfg = EnvConfig {
            test_timeout_secs: Some(20),
            ..EnvConfig::default()
        };
        let resolved = resolve_run_defaults(&cli, &env_cfg, Some(&file));
        assert_eq!(resolved.test_timeout_secs, 20);
    }

    #[test]
    fn model_override_applies_to_both_providers() {
        let cli = CliRunOverrides {
            model: Some("custom".to_string()),
            ..CliRunOverrides::default()
        };
        let resolved = resolve_run_defaults(&cli, &EnvConfig::default(), None);
        assert_eq!(resolved.ollama_model, "custom");
        assert_eq!(resolved.openai_model, "custom");
    }

    #[test]
    fn env_lookup_ignores_blank_and_invalid_values() {
        let env_cfg = EnvConfig::from_lookup(|name| match name {
            "SASDS_PROVIDER" => Some(" local ".to_string()),
            "OPENAI_API_KEY" => Some("   ".to_string()),
            "SASDS_TEST_TIMEOUT" => Some("soon".to_string()),
            "SASDS_NO_CACHE" => Some("yes".to_string()),
            _ => None,
        });
        assert_eq!(env_cfg.provider, Some(ProviderSetting::None));
        assert_eq!(env_cfg.openai_api_key, None);
        assert_eq!(env_cfg.test_timeout_secs, None);
        assert_eq!(env_cfg.no_cache, Some(true));
    }

    #[test]
    fn provider_aliases_parse() {
        assert_eq!(parse_provider("OpenAI-Compatible"), Some(ProviderSetting::Openai));
        assert_eq!(parse_provider("local"), Some(ProviderSetting::None));
        assert_eq!(parse_provider("gemini"), None);
    }
}
