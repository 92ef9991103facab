//! Command-line surface: argument parsing, command dispatch and the exit status.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info};

use crate::{
    appeal::AppealTrainer,
    clients::ModelType,
    config::{Config, ConfigOverrides},
    orchestrator::JobOrchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "recs-trainer", author, version, about, long_about = None)]
pub struct Cli {
    /// Supabase project URL
    #[arg(long, global = true, env = "SUPABASE_URL")]
    supabase_url: Option<String>,

    /// Supabase service role key
    #[arg(long, global = true, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
    supabase_key: Option<String>,

    /// OpenAI API key (embedding fallback)
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    /// Anthropic API key (primary embedding provider)
    #[arg(long, global = true, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train models through the remote training function
    Run {
        #[arg(long, value_enum, default_value = "all")]
        model: ModelChoice,

        /// Write the JSON result here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List recent remote training jobs
    Jobs,
    /// Train the appeal head locally and write its artifacts
    TrainAppeal {
        #[arg(long, env = "APPEAL_OUTPUT_DIR")]
        output_dir: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "snake_case")]
enum ModelChoice {
    AppealHead,
    UserVectors,
    Embeddings,
    All,
}

impl ModelChoice {
    fn model_type(self) -> Option<ModelType> {
        match self {
            ModelChoice::AppealHead => Some(ModelType::AppealHead),
            ModelChoice::UserVectors => Some(ModelType::UserVectors),
            ModelChoice::Embeddings => Some(ModelType::Embeddings),
            ModelChoice::All => None,
        }
    }
}

/// How a command ended, as seen by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Succeeded,
    Failed,
}

impl From<CommandStatus> for ExitCode {
    fn from(status: CommandStatus) -> Self {
        match status {
            CommandStatus::Succeeded => ExitCode::SUCCESS,
            CommandStatus::Failed => ExitCode::FAILURE,
        }
    }
}

/// Runs the parsed command. Errors are logged and reported as [`CommandStatus::Failed`],
/// as is a full pipeline run whose report ends in `failed`.
pub async fn execute(cli: Cli) -> CommandStatus {
    match run(cli).await {
        Ok(status) => status,
        Err(err) => {
            error!(error = %format!("{err:#}"), "command failed");
            CommandStatus::Failed
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<CommandStatus> {
    let output_dir = match &cli.command {
        Command::TrainAppeal { output_dir } => output_dir.clone(),
        _ => None,
    };
    let overrides = ConfigOverrides {
        supabase_url: cli.supabase_url,
        service_key: cli.supabase_key,
        openai_api_key: cli.openai_key,
        anthropic_api_key: cli.anthropic_key,
        output_dir,
    };
    let config = Config::load(&overrides).context("failed to load configuration")?;

    match cli.command {
        Command::Run { model, output } => {
            let orchestrator =
                JobOrchestrator::from_config(&config).context("failed to build orchestrator")?;
            if let Some(model_type) = model.model_type() {
                let job = orchestrator.run_model(model_type).await?;
                emit(&job, output.as_deref()).await?;
                Ok(CommandStatus::Succeeded)
            } else {
                let report = orchestrator.run_full_pipeline().await;
                emit(&report, output.as_deref()).await?;
                Ok(if report.is_success() {
                    CommandStatus::Succeeded
                } else {
                    CommandStatus::Failed
                })
            }
        }
        Command::Jobs => {
            let orchestrator =
                JobOrchestrator::from_config(&config).context("failed to build orchestrator")?;
            let jobs = orchestrator.list_jobs().await?;
            emit(&jobs, None).await?;
            Ok(CommandStatus::Succeeded)
        }
        Command::TrainAppeal { .. } => {
            let trainer =
                AppealTrainer::from_config(&config).context("failed to build appeal trainer")?;
            let outcome = trainer.run_training(config.output_dir()).await?;
            emit(&outcome, None).await?;
            Ok(CommandStatus::Succeeded)
        }
    }
}

async fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    match output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("failed to write result to {}", path.display()))?;
            info!(path = %path.display(), "result written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_defaults_to_the_full_pipeline() {
        let cli = Cli::try_parse_from(["recs-trainer", "run"]).expect("args should parse");

        assert!(matches!(
            cli.command,
            Command::Run {
                model: ModelChoice::All,
                output: None
            }
        ));
    }

    #[test]
    fn model_names_are_snake_case() {
        let cli = Cli::try_parse_from(["recs-trainer", "run", "--model", "user_vectors"])
            .expect("args should parse");

        let Command::Run { model, .. } = cli.command else {
            panic!("expected run, got {:?}", cli.command);
        };
        assert_eq!(model.model_type(), Some(ModelType::UserVectors));
    }
}
