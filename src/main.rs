use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use salvia_engine::WorkflowEngine;
use salvia_node::{EndNode, StartNode};
use salvia_state::WorkflowState;

/// Salvia - a self-healing workflow execution engine
#[derive(Parser)]
#[command(name = "salvia")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the simple demo workflow for a tenant
  Run {
    /// Tenant the execution belongs to
    #[arg(long)]
    tenant: String,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Run { tenant }) => {
      run_workflow(tenant)?;
    }
    None => {
      println!("salvia - use --help to see available commands");
    }
  }

  Ok(())
}

fn run_workflow(tenant: String) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_workflow_async(tenant).await })
}

async fn run_workflow_async(tenant: String) -> Result<()> {
  let payload = read_payload_from_stdin()?;

  let mut engine = WorkflowEngine::new(&tenant);
  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "end");
  engine
    .build_workflow("simple")
    .context("failed to compile workflow")?;

  let mut state = WorkflowState::new(Uuid::new_v4(), tenant);
  if let serde_json::Value::Object(fields) = payload {
    state.data.extend(fields);
  }

  let result = engine
    .execute_workflow("simple", state)
    .await
    .context("workflow execution failed")?;

  eprintln!("Execution completed: {}", result.status);
  if let Some(duration) = result.get_duration_ms() {
    eprintln!("Duration: {}ms", duration);
  }

  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
