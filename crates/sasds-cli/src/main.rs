mod commands;
mod runtime_context;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sasds_config::{CliRunOverrides, ProviderSetting};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Auto,
    Ollama,
    Openai,
    /// Skip models entirely and use the local rules.
    None,
}

impl ProviderArg {
    fn as_setting(self) -> ProviderSetting {
        match self {
            ProviderArg::Auto => ProviderSetting::Auto,
            ProviderArg::Ollama => ProviderSetting::Ollama,
            ProviderArg::Openai => ProviderSetting::Openai,
            ProviderArg::None => ProviderSetting::None,
        }
    }
}

/// Flags shared by every command that touches a model or the test runner.
#[derive(Debug, Clone, Args)]
struct RuntimeArgs {
    /// Path to a sasds.json config file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    provider: Option<ProviderArg>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    ollama_url: Option<String>,
    /// Python interpreter used to run pytest.
    #[arg(long)]
    python: Option<String>,
    /// Test timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    #[arg(long)]
    no_cache: bool,
    #[arg(long)]
    no_progress: bool,
    #[arg(long)]
    verbose: bool,
}

impl RuntimeArgs {
    fn overrides(&self) -> CliRunOverrides {
        CliRunOverrides {
            provider: self.provider.map(ProviderArg::as_setting),
            ollama_url: self.ollama_url.clone(),
            model: self.model.clone(),
            python: self.python.clone(),
            test_timeout_secs: self.timeout,
            no_cache: self.no_cache.then_some(true),
            verbose: self.verbose.then_some(true),
            no_progress: self.no_progress.then_some(true),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "sasds",
    version,
    about = "Turn a requirement into tested, reviewed Python code"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Break a requirement into tasks and libraries.
    Analyze {
        requirement: String,
        /// File whose head is appended to the requirement.
        #[arg(long)]
        attach: Option<PathBuf>,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Analyze a requirement and generate a Python module for it.
    Generate {
        requirement: String,
        #[arg(long)]
        attach: Option<PathBuf>,
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Validate an existing Python module under the pytest harness.
    Test {
        file: PathBuf,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Test and review an existing Python module.
    Review {
        file: PathBuf,
        /// Where to write the refined module, if the reviewer produced one.
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Run analyze, generate, test and review for a requirement.
    Run {
        requirement: String,
        #[arg(long)]
        attach: Option<PathBuf>,
        /// Write a ZIP package of the session.
        #[arg(long, value_name = "ZIP")]
        export: Option<PathBuf>,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Print the pytest harness synthesized for a module.
    Harness { file: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            requirement,
            attach,
            runtime,
        } => commands::analyze_command(&requirement, attach.as_deref(), &runtime),
        Commands::Generate {
            requirement,
            attach,
            output,
            runtime,
        } => commands::generate_command(
            &requirement,
            attach.as_deref(),
            output.as_deref(),
            &runtime,
        ),
        Commands::Test {
            file,
            json,
            runtime,
        } => commands::test_command(&file, json, &runtime),
        Commands::Review {
            file,
            output,
            runtime,
        } => commands::review_command(&file, output.as_deref(), &runtime),
        Commands::Run {
            requirement,
            attach,
            export,
            json,
            runtime,
        } => commands::run_command(
            &requirement,
            attach.as_deref(),
            export.as_deref(),
            json,
            &runtime,
        ),
        Commands::Harness { file } => commands::harness_command(&file),
    }
}
