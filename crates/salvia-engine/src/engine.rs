//! The workflow execution engine.

use std::sync::Arc;
use std::time::Duration;

use salvia_health::HealthMonitor;
use salvia_node::{WorkflowNode, execute};
use salvia_state::{FailurePattern, HealthStatus, WorkflowState, WorkflowStatus};
use salvia_workflow::{EdgePredicate, Graph, GraphRegistry};
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::records::{ExecutionRecorder, NoopRecorder};
use crate::recovery;

/// Upper bound on any backoff delay.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Configuration for the workflow engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Whether to re-run a failed workflow on a fresh state after
  /// recovery has given up.
  pub auto_restart: bool,
  /// Maximum automatic restarts per execution chain.
  pub max_auto_restarts: u32,
  /// Base delay for exponential backoff before retries and restarts.
  pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      auto_restart: true,
      max_auto_restarts: 3,
      retry_backoff_ms: 1_000,
    }
  }
}

/// Drives compiled workflow graphs to completion for one tenant.
///
/// One engine instance per tenant: it owns the tenant's graph registry
/// and reports into the tenant's health monitor. Executions are
/// sequential over nodes within a run; the engine never re-enters a
/// graph for the same execution id, and each run exclusively owns its
/// state.
///
/// Generic over `R: ExecutionRecorder`; the default [`NoopRecorder`]
/// is the no-persistence mode.
pub struct WorkflowEngine<R: ExecutionRecorder = NoopRecorder> {
  tenant_id: String,
  registry: GraphRegistry,
  health: HealthMonitor,
  recorder: R,
  config: EngineConfig,
}

impl WorkflowEngine<NoopRecorder> {
  /// Create an engine with no persistence and default configuration.
  pub fn new(tenant_id: impl Into<String>) -> Self {
    Self::with_recorder(tenant_id, NoopRecorder, EngineConfig::default())
  }
}

impl<R: ExecutionRecorder> WorkflowEngine<R> {
  /// Create an engine with an execution-record collaborator.
  pub fn with_recorder(tenant_id: impl Into<String>, recorder: R, config: EngineConfig) -> Self {
    let tenant_id = tenant_id.into();
    info!(tenant_id = %tenant_id, "workflow engine initialized");
    Self {
      health: HealthMonitor::new(&tenant_id),
      tenant_id,
      registry: GraphRegistry::new(),
      recorder,
      config,
    }
  }

  pub fn tenant_id(&self) -> &str {
    &self.tenant_id
  }

  /// The tenant's health monitor.
  pub fn health_monitor(&self) -> &HealthMonitor {
    &self.health
  }

  /// Register a node for the next compile.
  pub fn register_node(&mut self, name: impl Into<String>, node: Arc<dyn WorkflowNode>) {
    self.registry.register(name, node);
  }

  /// Add an unconditional edge for the next compile.
  pub fn connect(&mut self, from: impl Into<String>, to: impl Into<String>) {
    self.registry.connect(from, to);
  }

  /// Add a conditional edge for the next compile.
  pub fn connect_conditional(
    &mut self,
    from: impl Into<String>,
    predicate: EdgePredicate,
    branches: std::collections::HashMap<String, String>,
  ) {
    self.registry.connect_conditional(from, predicate, branches);
  }

  /// Compile current registrations into an immutable graph stored
  /// under `workflow_name`. Replaces any previous graph of that name;
  /// in-flight executions finish on their old snapshot.
  pub fn build_workflow(&mut self, workflow_name: &str) -> Result<Arc<Graph>, EngineError> {
    Ok(self.registry.compile(workflow_name)?)
  }

  /// Look up a compiled graph.
  pub fn graph(&self, workflow_name: &str) -> Option<Arc<Graph>> {
    self.registry.graph(workflow_name)
  }

  /// Drop pending registrations; compiled graphs are kept.
  pub fn clear_registrations(&mut self) {
    self.registry.clear();
  }

  /// Execute a compiled workflow by name.
  pub async fn execute_workflow(
    &self,
    workflow_name: &str,
    initial_state: WorkflowState,
  ) -> Result<WorkflowState, EngineError> {
    let graph = self
      .registry
      .graph(workflow_name)
      .ok_or_else(|| EngineError::WorkflowNotFound(workflow_name.to_string()))?;
    Ok(self.execute(&graph, initial_state).await)
  }

  /// Execute a graph over an initial state, with the full self-healing
  /// path: on an engine-level fault the recovery coordinator is given
  /// a chance, then auto-restart, before the state is marked failed.
  ///
  /// Node errors and validation failures are recorded in-state and do
  /// not reach this level; the returned state's status and error log
  /// carry the outcome.
  #[instrument(
    name = "workflow_execute",
    skip(self, graph, initial_state),
    fields(
      tenant_id = %self.tenant_id,
      workflow = %graph.name(),
      workflow_id = %initial_state.workflow_id,
    )
  )]
  pub async fn execute(&self, graph: &Graph, initial_state: WorkflowState) -> WorkflowState {
    let mut state = initial_state;
    let execution_id = *state.execution_id.get_or_insert_with(Uuid::new_v4);
    let workflow_id = state.workflow_id.to_string();

    info!(execution_id = %execution_id, "workflow_started");

    let record_id = match self
      .recorder
      .create(state.workflow_id, "manual", &state.data)
      .await
    {
      Ok(id) => Some(id),
      Err(err) => {
        warn!(error = %err, "execution_record_create_failed");
        None
      }
    };

    match self.run_graph(graph, &mut state, record_id.as_deref()).await {
      Ok(()) => {
        let duration = state.get_duration_ms();
        self
          .health
          .record_execution(&workflow_id, &execution_id.to_string(), true, duration, None);
        if let Some(id) = &record_id {
          if let Err(err) = self
            .recorder
            .complete(id, &state.data, duration.unwrap_or(0))
            .await
          {
            warn!(error = %err, "execution_record_complete_failed");
          }
        }
        info!(execution_id = %execution_id, "workflow_completed");
        state
      }
      Err(fault) => {
        let error_text = fault.to_string();
        error!(execution_id = %execution_id, error = %error_text, "workflow_failed");
        self.health.record_execution(
          &workflow_id,
          &execution_id.to_string(),
          false,
          None,
          Some(&error_text),
        );

        let attempts_before = state.recovery_attempts;
        if let Some(recovered) =
          recovery::attempt_recovery(self, graph, &mut state, &error_text).await
        {
          let strategy = recovered
            .recovery_strategy
            .map(|s| s.to_string())
            .unwrap_or_default();
          self.health.record_recovery_attempt(
            &workflow_id,
            &execution_id.to_string(),
            true,
            &strategy,
          );
          self.health.record_execution(
            &workflow_id,
            &execution_id.to_string(),
            true,
            recovered.get_duration_ms(),
            None,
          );
          if let Some(id) = &record_id {
            let duration = recovered.get_duration_ms().unwrap_or(0);
            if let Err(err) = self.recorder.complete(id, &recovered.data, duration).await {
              warn!(error = %err, "execution_record_complete_failed");
            }
          }
          info!(execution_id = %execution_id, strategy = %strategy, "workflow_recovered");
          return recovered;
        }
        if state.recovery_attempts > attempts_before {
          let strategy = state
            .recovery_strategy
            .map(|s| s.to_string())
            .unwrap_or_default();
          self.health.record_recovery_attempt(
            &workflow_id,
            &execution_id.to_string(),
            false,
            &strategy,
          );
        }

        if self.config.auto_restart {
          if let Some(restarted) = self
            .attempt_auto_restart(graph, &state, record_id.as_deref())
            .await
          {
            return restarted;
          }
        }

        state.fail(&error_text);
        if let Some(id) = &record_id {
          if let Err(err) = self.recorder.fail(id, &error_text).await {
            warn!(error = %err, "execution_record_fail_failed");
          }
        }
        if state.needs_intervention() {
          warn!(
            execution_id = %execution_id,
            health_status = %state.health_status,
            "workflow requires manual intervention"
          );
        }
        state
      }
    }
  }

  /// Resume a paused execution at its current node.
  ///
  /// Only `Paused` states are accepted; resumption never overlaps the
  /// recovery subsystem.
  pub async fn resume(
    &self,
    graph: &Graph,
    mut state: WorkflowState,
  ) -> Result<WorkflowState, EngineError> {
    state.resume()?;
    let start = state
      .current_node
      .clone()
      .unwrap_or_else(|| graph.entry().to_string());
    info!(workflow = %graph.name(), node = %start, "workflow_resumed");
    self.run_from(graph, &start, &mut state, None).await?;
    Ok(state)
  }

  /// The raw step loop, from the graph's entry node.
  pub(crate) async fn run_graph(
    &self,
    graph: &Graph,
    state: &mut WorkflowState,
    record_id: Option<&str>,
  ) -> Result<(), EngineError> {
    let entry = graph.entry().to_string();
    self.run_from(graph, &entry, state, record_id).await
  }

  /// Step loop from a given node: validate+execute the current node,
  /// re-run it within the retry budget when it reported errors, then
  /// follow the conditional edge if one is registered, else the single
  /// unconditional edge, else terminate completed.
  async fn run_from(
    &self,
    graph: &Graph,
    start: &str,
    state: &mut WorkflowState,
    record_id: Option<&str>,
  ) -> Result<(), EngineError> {
    let mut current = start.to_string();

    loop {
      let Some(node) = graph.node(&current) else {
        return Err(EngineError::NodeNotFound { node: current });
      };

      let errors_before = state.errors.len();
      let ok = execute(node.as_ref(), state).await;
      let step_errored = !ok || state.errors.len() > errors_before;

      if let Some(id) = record_id {
        let last_error = if step_errored { state.last_error() } else { None };
        if let Err(err) = self
          .recorder
          .update(id, state.status, &state.data, last_error)
          .await
        {
          warn!(error = %err, "execution_record_update_failed");
        }
      }

      if state.status == WorkflowStatus::Paused {
        info!(node = %current, "workflow_paused");
        return Ok(());
      }

      if step_errored && node.config().retry_on_failure && state.should_retry() {
        state.increment_retry();
        debug!(node = %current, retry_count = state.retry_count, "node_retry");
        continue;
      }

      if let Some(edge) = graph.conditional(&current) {
        let label = (edge.predicate)(state);
        let Some(next) = edge.branches.get(&label) else {
          return Err(EngineError::UnknownBranch {
            node: current,
            label,
          });
        };
        debug!(from = %current, to = %next, label = %label, "conditional_edge_taken");
        current = next.clone();
        continue;
      }

      match graph.next(&current) {
        Some(next) => current = next.to_string(),
        None => break,
      }
    }

    if !state.status.is_terminal() {
      state.complete();
    }
    Ok(())
  }

  /// Exponential backoff delay for the given attempt number, capped.
  pub(crate) fn backoff(&self, attempt: u32) -> Duration {
    let exp = self
      .config
      .retry_backoff_ms
      .saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(exp.min(MAX_BACKOFF_MS))
  }

  /// Re-run a failed workflow on a fresh state, carrying the restart
  /// count in the data map, bounded by `max_auto_restarts`.
  async fn attempt_auto_restart(
    &self,
    graph: &Graph,
    failed: &WorkflowState,
    record_id: Option<&str>,
  ) -> Option<WorkflowState> {
    let mut state = failed.clone();

    loop {
      if !self.should_auto_restart(&state) {
        return None;
      }

      let restart_count = restart_count(&state) as u32 + 1;
      let mut fresh = restart_state(&state, restart_count);
      info!(
        workflow_id = %fresh.workflow_id,
        restart_count,
        "workflow_auto_restart"
      );
      tokio::time::sleep(self.backoff(restart_count - 1)).await;

      match self.run_graph(graph, &mut fresh, record_id).await {
        Ok(()) => {
          self.health.record_execution(
            &fresh.workflow_id.to_string(),
            &fresh
              .execution_id
              .map(|id| id.to_string())
              .unwrap_or_default(),
            true,
            fresh.get_duration_ms(),
            None,
          );
          if let Some(id) = record_id {
            let duration = fresh.get_duration_ms().unwrap_or(0);
            if let Err(err) = self.recorder.complete(id, &fresh.data, duration).await {
              warn!(error = %err, "execution_record_complete_failed");
            }
          }
          return Some(fresh);
        }
        Err(err) => {
          let error_text = err.to_string();
          warn!(restart_count, error = %error_text, "workflow_auto_restart_failed");
          self.health.record_execution(
            &fresh.workflow_id.to_string(),
            &fresh
              .execution_id
              .map(|id| id.to_string())
              .unwrap_or_default(),
            false,
            None,
            Some(&error_text),
          );
          fresh.failure_pattern =
            Some(FailurePattern::classify(&error_text, fresh.errors.len()));
          state = fresh;
        }
      }
    }
  }

  fn should_auto_restart(&self, state: &WorkflowState) -> bool {
    if restart_count(state) >= u64::from(self.config.max_auto_restarts) {
      debug!(workflow_id = %state.workflow_id, "auto-restart budget exhausted");
      return false;
    }

    // Persistent failures will not be fixed by running again.
    if state.failure_pattern == Some(FailurePattern::Persistent) {
      return false;
    }

    if let Some((status, metrics)) = self.health.get_workflow_health(&state.workflow_id.to_string())
    {
      if status == HealthStatus::Critical && metrics.error_rate > 0.8 {
        debug!(workflow_id = %state.workflow_id, "workflow critical, skipping auto-restart");
        return false;
      }
    }

    true
  }
}

fn restart_count(state: &WorkflowState) -> u64 {
  state
    .data
    .get("auto_restart_count")
    .and_then(Value::as_u64)
    .unwrap_or(0)
}

/// Fresh state for a restart: same identity and payload, cleared
/// errors and counters, new execution id.
fn restart_state(failed: &WorkflowState, restart_count: u32) -> WorkflowState {
  let mut fresh = WorkflowState::new(failed.workflow_id, failed.tenant_id.clone());
  fresh.execution_id = Some(Uuid::new_v4());
  fresh.data = failed.data.clone();
  fresh.context = failed.context.clone();
  fresh
    .data
    .insert("auto_restart_count".into(), json!(restart_count));
  fresh
}
