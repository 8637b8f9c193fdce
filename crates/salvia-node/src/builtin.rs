//! Built-in nodes: start/end markers, agent sub-task execution, and
//! closure-bodied nodes for ad-hoc work.

use async_trait::async_trait;
use chrono::Utc;
use salvia_state::WorkflowState;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::node::WorkflowNode;

/// Entry node: marks the state initialized and records the start time.
pub struct StartNode {
  config: NodeConfig,
}

impl StartNode {
  pub fn new() -> Self {
    Self {
      config: NodeConfig::new("start")
        .with_description("Workflow start node")
        .with_outputs(["initialized"]),
    }
  }
}

impl Default for StartNode {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl WorkflowNode for StartNode {
  fn config(&self) -> &NodeConfig {
    &self.config
  }

  async fn run(&self, state: &mut WorkflowState) -> Result<(), NodeError> {
    state.data.insert("initialized".into(), json!(true));
    state
      .data
      .insert("start_time".into(), json!(Utc::now().to_rfc3339()));
    Ok(())
  }
}

/// Terminal node: completes the state and records the end time.
pub struct EndNode {
  config: NodeConfig,
}

impl EndNode {
  pub fn new() -> Self {
    Self {
      config: NodeConfig::new("end").with_description("Workflow end node"),
    }
  }
}

impl Default for EndNode {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl WorkflowNode for EndNode {
  fn config(&self) -> &NodeConfig {
    &self.config
  }

  async fn run(&self, state: &mut WorkflowState) -> Result<(), NodeError> {
    state
      .data
      .insert("end_time".into(), json!(Utc::now().to_rfc3339()));
    state.complete();
    Ok(())
  }
}

/// Result of invoking an agent for a sub-task.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
  pub output: Value,
  pub cost_usd: f64,
  pub tokens_used: u64,
}

/// Handler invoked by [`AgentNode`] with the `agent_input` payload.
pub type AgentHandler = Box<dyn Fn(Value) -> Result<AgentOutcome, NodeError> + Send + Sync>;

/// Node that runs an agent sub-task.
///
/// Reads `agent_input` from the data map, invokes the handler, stores
/// the outcome under `agent_output` and in the agent-result map keyed
/// by agent id, and accounts cost and token usage on the state.
pub struct AgentNode {
  config: NodeConfig,
  agent_id: Uuid,
  handler: AgentHandler,
}

impl AgentNode {
  pub fn new(agent_id: Uuid, handler: AgentHandler) -> Self {
    Self {
      config: NodeConfig::new(format!("agent_{agent_id}"))
        .with_description(format!("Execute agent {agent_id}"))
        .with_required_inputs(["agent_input"])
        .with_outputs(["agent_output"]),
      agent_id,
      handler,
    }
  }
}

#[async_trait]
impl WorkflowNode for AgentNode {
  fn config(&self) -> &NodeConfig {
    &self.config
  }

  async fn run(&self, state: &mut WorkflowState) -> Result<(), NodeError> {
    let input = state
      .data
      .get("agent_input")
      .cloned()
      .unwrap_or(Value::Null);

    let outcome = (self.handler)(input.clone())?;

    let result = json!({
      "agent_id": self.agent_id.to_string(),
      "input": input,
      "output": outcome.output,
      "timestamp": Utc::now().to_rfc3339(),
      "cost_usd": outcome.cost_usd,
      "tokens_used": outcome.tokens_used,
    });

    state.data.insert("agent_output".into(), result.clone());
    state
      .agent_results
      .insert(self.agent_id.to_string(), result);
    state.add_cost(outcome.cost_usd, outcome.tokens_used);
    Ok(())
  }
}

/// Closure body for a [`FnNode`].
pub type NodeBody = Box<dyn Fn(&mut WorkflowState) -> Result<(), NodeError> + Send + Sync>;

/// A node whose body is an arbitrary closure.
///
/// The workhorse for business-logic authors and tests: contract in the
/// config, behavior in the closure.
pub struct FnNode {
  config: NodeConfig,
  body: NodeBody,
}

impl FnNode {
  pub fn new(
    config: NodeConfig,
    body: impl Fn(&mut WorkflowState) -> Result<(), NodeError> + Send + Sync + 'static,
  ) -> Self {
    Self {
      config,
      body: Box::new(body),
    }
  }
}

#[async_trait]
impl WorkflowNode for FnNode {
  fn config(&self) -> &NodeConfig {
    &self.config
  }

  async fn run(&self, state: &mut WorkflowState) -> Result<(), NodeError> {
    (self.body)(state)
  }
}
