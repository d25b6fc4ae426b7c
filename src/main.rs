use anyhow::{bail, Context as _};
use cadence_rs::adk::agent::{Agent, ClaudeCliAgent};
use cadence_rs::cadence::config::EngineConfig;
use cadence_rs::cadence::workflow::builder::Builder;
use cadence_rs::cadence::workflow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::Value;

use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workflow from a file
    Run {
        /// Path to the workflow file
        #[arg(short, long)]
        file: PathBuf,

        /// Continue from the state saved in the session directory
        #[arg(long, requires = "session_dir")]
        resume: bool,

        /// Session directory (defaults to a new one under the session root)
        #[arg(long)]
        session_dir: Option<PathBuf>,

        /// Directory the agent runs in
        #[arg(long, default_value = ".")]
        execution_dir: PathBuf,

        /// Extra context entries as key=value (value parsed as JSON when possible)
        #[arg(short, long = "context", value_parser = parse_context_entry)]
        context: Vec<(String, Value)>,

        /// Print the execution report as JSON
        #[arg(long)]
        json: bool,

        /// Pass --verbose to the claude CLI
        #[arg(short, long)]
        verbose: bool,
    },
    /// Validate a workflow file without running it
    Check {
        /// Path to the workflow file
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn parse_context_entry(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let builder = Builder::new(EngineConfig::from_env()?);

    match args.command {
        Commands::Run {
            file,
            resume,
            session_dir,
            execution_dir,
            context,
            json,
            verbose,
        } => {
            let def = builder
                .load(&file)
                .with_context(|| format!("loading {}", file.display()))?;
            let config = builder.config_for(&def)?;

            let agent = ClaudeCliAgent::locate(&config.claude_bin, &execution_dir)?
                .with_auto_compact(config.auto_compact)
                .with_verbose(verbose);
            log::info!(
                "Using agent '{}' in {}",
                agent.name(),
                execution_dir.display()
            );

            let mut workflow = builder
                .build_from_def(&def, Arc::new(agent))?
                .with_execution_dir(&execution_dir);
            if let Some(dir) = session_dir {
                workflow = workflow.with_session_dir(dir);
            }

            let cancel = workflow.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupt received, stopping after the current turn");
                    cancel.cancel();
                }
            });

            let initial: Context = context.into_iter().collect();
            let report = workflow.execute(initial, resume).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Workflow: {}", report.workflow);
                println!("Session:  {}", report.session_dir.display());
                for step in &report.completed_steps {
                    let cost = report.cost_per_step.get(step).copied().unwrap_or(0.0);
                    println!("  done     {} (${:.4})", step, cost);
                }
                for step in &report.skipped_steps {
                    println!("  skipped  {}", step);
                }
                println!("Total cost: ${:.4}", report.total_cost);
            }

            if let Some(failure) = &report.failure {
                bail!("step '{}' failed: {}", failure.step, failure.message);
            }
        }
        Commands::Check { file } => {
            let def = builder
                .load(&file)
                .with_context(|| format!("loading {}", file.display()))?;
            let config = builder.config_for(&def)?;
            let agent = ClaudeCliAgent::new(&config.claude_bin, ".");
            let workflow = builder.build_from_def(&def, Arc::new(agent))?;
            println!(
                "{}: {} steps ({})",
                workflow.name(),
                workflow.ledger().len(),
                workflow.ledger().names().join(", ")
            );
        }
    }

    Ok(())
}
