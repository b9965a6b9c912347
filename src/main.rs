//! Toolflow - tool-call and apply-state orchestration for IDE coding assistants

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolflow::api::{Script, ScriptedChatClient};
use toolflow::edit::{apply_blocks_sequentially, collect_complete_blocks};
use toolflow::local::{unified_diff, ApplyDecision, LocalHost};
use toolflow::types::apply::ApplyState;
use toolflow::{Coordinator, EngineConfig, TurnOutcome};

#[derive(Parser, Debug)]
#[command(name = "toolflow")]
#[command(about = "Toolflow - tool-call and apply-state orchestration for IDE coding assistants")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Engine configuration file (defaults to the user config directory)
    #[arg(long, global = true, env = "TOOLFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply search/replace blocks to a file.
    /// Prints the resulting diff unless --write is given.
    Apply {
        /// File to edit
        target: PathBuf,

        /// File containing SEARCH/REPLACE blocks
        diff: PathBuf,

        /// Write the result back to the target
        #[arg(long)]
        write: bool,
    },

    /// Replay a scripted session against a local directory and print the
    /// resulting history as YAML.
    Replay {
        /// YAML session script
        script: PathBuf,

        /// Workspace directory
        #[arg(short = 'C', long, default_value = ".")]
        directory: PathBuf,

        /// Reject every proposed edit
        #[arg(long)]
        reject: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match args.command {
        Command::Apply { target, diff, write } => apply(&target, &diff, write).await,
        Command::Replay {
            script,
            directory,
            reject,
        } => {
            let config = load_config(args.config.as_deref())?;
            replay(&script, directory, reject, config).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => EngineConfig::default_path()?,
    };
    let config = EngineConfig::load(&path)?;
    info!(path = %path.display(), max_depth = config.max_depth, "Loaded configuration");
    Ok(config)
}

async fn apply(target: &Path, diff: &Path, write: bool) -> Result<()> {
    let original = tokio::fs::read_to_string(target)
        .await
        .with_context(|| format!("Failed to read {}", target.display()))?;
    let diff_text = tokio::fs::read_to_string(diff)
        .await
        .with_context(|| format!("Failed to read {}", diff.display()))?;

    let parsed = collect_complete_blocks(&[diff_text])?;
    let updated = apply_blocks_sequentially(&original, &parsed.blocks)?;
    info!(blocks = parsed.blocks.len(), dropped = parsed.dropped, "Applied search/replace blocks");

    if write {
        tokio::fs::write(target, &updated)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        println!("Updated {}", target.display());
    } else {
        print!("{}", unified_diff(&target.display().to_string(), &original, &updated));
    }
    Ok(())
}

async fn replay(script_path: &Path, directory: PathBuf, reject: bool, config: EngineConfig) -> Result<()> {
    let script = Script::load(script_path)?;
    let decision = if reject || script.reject_edits {
        ApplyDecision::Reject
    } else {
        ApplyDecision::Accept
    };

    let (tx, mut updates) = mpsc::unbounded_channel::<ApplyState>();
    let host = LocalHost::new(directory, tx).with_decision(decision);
    let coordinator = Coordinator::new(host, ScriptedChatClient::from(&script), config);

    let mut outcome = coordinator.submit(script.prompt.as_str()).await?;
    loop {
        let next = match &outcome {
            TurnOutcome::AwaitingApproval { tool_call_ids } => {
                let mut next = None;
                for id in tool_call_ids {
                    info!(tool_call_id = %id, "Approving tool call");
                    if let Some(result) = coordinator.approve_tool_call(id).await? {
                        next = Some(result);
                    }
                }
                next
            }
            TurnOutcome::AwaitingApply { .. } => {
                let mut next = None;
                while let Ok(update) = updates.try_recv() {
                    if let Some(result) = coordinator.handle_apply_state_update(update).await? {
                        next = Some(result);
                    }
                }
                next
            }
            TurnOutcome::Completed
            | TurnOutcome::Halted
            | TurnOutcome::DepthExceeded
            | TurnOutcome::Aborted => break,
        };
        match next {
            Some(next) => outcome = next,
            None => bail!("Session stalled at {outcome:?}"),
        }
    }

    info!(outcome = ?outcome, remaining_turns = coordinator.llm().remaining(), "Replay finished");
    let history = coordinator.history().snapshot();
    print!("{}", serde_yaml::to_string(&history)?);
    Ok(())
}
