use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use salvia_engine::{
  ChannelRecorder, EngineConfig, EngineError, NoopRecorder, RecordEvent, WorkflowEngine,
};
use salvia_node::{EndNode, FnNode, NodeConfig, NodeError, StartNode};
use salvia_state::{HealthStatus, WorkflowState, WorkflowStatus};
use salvia_workflow::EdgePredicate;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

fn test_state() -> WorkflowState {
  WorkflowState::new(Uuid::new_v4(), "tenant-a")
}

fn fast_config() -> EngineConfig {
  EngineConfig {
    auto_restart: false,
    max_auto_restarts: 3,
    retry_backoff_ms: 1,
  }
}

fn fast_engine() -> WorkflowEngine {
  WorkflowEngine::new("tenant-a")
}

/// start -> end, nothing in between.
fn build_linear(engine: &mut WorkflowEngine) {
  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "end");
  engine.build_workflow("linear").unwrap();
}

#[tokio::test]
async fn linear_workflow_completes() {
  let mut engine = fast_engine();
  build_linear(&mut engine);

  let state = engine
    .execute_workflow("linear", test_state())
    .await
    .unwrap();

  assert_eq!(state.status, WorkflowStatus::Completed);
  assert_eq!(state.data["initialized"], json!(true));
  assert!(state.errors.is_empty());
  assert!(state.get_duration_ms().unwrap() >= 0);
}

#[tokio::test]
async fn unknown_workflow_is_an_error() {
  let engine = fast_engine();
  let result = engine.execute_workflow("ghost", test_state()).await;
  assert!(matches!(result, Err(EngineError::WorkflowNotFound(_))));
}

#[tokio::test]
async fn missing_required_input_records_one_error_and_continues() {
  let mut engine = fast_engine();
  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node(
    "process",
    Arc::new(FnNode::new(
      NodeConfig::new("process")
        .with_required_inputs(["payload"])
        .with_retry_on_failure(false),
      |state| {
        state.data.insert("processed".into(), json!(true));
        Ok(())
      },
    )),
  );
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "process");
  engine.connect("process", "end");
  engine.build_workflow("wf").unwrap();

  let state = engine.execute_workflow("wf", test_state()).await.unwrap();

  // Validation failure is recorded in-state, the body is skipped, and
  // the run carries on to completion.
  assert_eq!(state.status, WorkflowStatus::Completed);
  assert_eq!(state.errors.len(), 1);
  assert!(state.errors[0].message.contains("missing required input"));
  assert!(!state.data.contains_key("processed"));
}

#[tokio::test]
async fn node_errors_are_retried_within_budget() {
  let attempts = Arc::new(AtomicUsize::new(0));
  let counter = attempts.clone();

  let mut engine = fast_engine();
  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node(
    "flaky",
    Arc::new(FnNode::new(NodeConfig::new("flaky"), move |state| {
      if counter.fetch_add(1, Ordering::SeqCst) < 2 {
        return Err(NodeError::new("transient glitch"));
      }
      state.data.insert("done".into(), json!(true));
      Ok(())
    })),
  );
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "flaky");
  engine.connect("flaky", "end");
  engine.build_workflow("wf").unwrap();

  let state = engine.execute_workflow("wf", test_state()).await.unwrap();

  assert_eq!(state.status, WorkflowStatus::Completed);
  assert_eq!(attempts.load(Ordering::SeqCst), 3);
  assert_eq!(state.retry_count, 2);
  assert_eq!(state.errors.len(), 2);
  assert_eq!(state.data["done"], json!(true));
}

/// Engine with a conditional edge from "check" whose predicate returns
/// a fixed label that is not in the branch map, producing an
/// engine-level fault with that label in the message.
fn build_faulting(engine: &mut WorkflowEngine, label: &str) {
  let label = label.to_string();
  let predicate: EdgePredicate = Arc::new(move |_state| label.clone());

  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node(
    "check",
    Arc::new(FnNode::new(NodeConfig::new("check"), |_| Ok(()))),
  );
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "check");
  engine.connect_conditional(
    "check",
    predicate,
    HashMap::from([("ok".to_string(), "end".to_string())]),
  );
  engine.build_workflow("wf").unwrap();
}

#[tokio::test]
async fn persistent_fault_is_skipped_and_completes_degraded() {
  let mut engine = WorkflowEngine::with_recorder("tenant-a", NoopRecorder, fast_config());
  // "invalid" classifies as a persistent failure.
  build_faulting(&mut engine, "invalid");

  let state = engine.execute_workflow("wf", test_state()).await.unwrap();

  assert_eq!(state.status, WorkflowStatus::Completed);
  assert_eq!(state.health_status, HealthStatus::Degraded);
  assert!(
    state
      .last_error()
      .is_some_and(|msg| msg.contains("skipped node: check"))
  );
  assert_eq!(state.recovery_attempts, 1);
}

#[tokio::test]
async fn resource_fault_rolls_back_to_checkpoint() {
  let mut engine = WorkflowEngine::with_recorder("tenant-a", NoopRecorder, fast_config());
  // "quota" classifies as a resource failure.
  build_faulting(&mut engine, "quota");

  let mut initial = test_state();
  initial.create_checkpoint("before-run").unwrap();

  let state = engine.execute_workflow("wf", initial).await.unwrap();

  assert_eq!(state.status, WorkflowStatus::Completed);
  assert_eq!(state.health_status, HealthStatus::Healthy);
  assert!(state.last_checkpoint.is_some());
}

#[tokio::test]
async fn cascading_fault_falls_back() {
  let mut engine = WorkflowEngine::with_recorder("tenant-a", NoopRecorder, fast_config());
  // No keyword matches and two prior errors: cascading.
  build_faulting(&mut engine, "oops");

  let mut initial = test_state();
  initial.data.insert("answer".into(), json!(42));
  initial.add_error("first unrelated error", None);
  initial.add_error("second unrelated error", None);

  let state = engine.execute_workflow("wf", initial).await.unwrap();

  assert_eq!(state.status, WorkflowStatus::Completed);
  assert_eq!(state.health_status, HealthStatus::Degraded);
  assert_eq!(state.data["fallback_mode"], json!(true));
  assert_eq!(state.data["original_data"]["answer"], json!(42));
}

#[tokio::test]
async fn transient_fault_without_restart_fails_terminally() {
  let mut engine = WorkflowEngine::with_recorder("tenant-a", NoopRecorder, fast_config());
  // "timeout" classifies as transient; retry re-runs the graph and
  // hits the same fault, and auto-restart is off.
  build_faulting(&mut engine, "timeout");

  let state = engine.execute_workflow("wf", test_state()).await.unwrap();

  assert_eq!(state.status, WorkflowStatus::Failed);
  assert!(!state.errors.is_empty());
  assert!(state.last_error().is_some_and(|msg| msg.contains("timeout")));
  assert_eq!(state.recovery_attempts, 1);
}

#[tokio::test]
async fn transient_fault_recovers_via_auto_restart() {
  let config = EngineConfig {
    auto_restart: true,
    max_auto_restarts: 3,
    retry_backoff_ms: 1,
  };
  let mut engine = WorkflowEngine::with_recorder("tenant-a", NoopRecorder, config);

  // Routes to "end" only once the restart marker is present, so the
  // first run (and its retry) faults and the restarted run succeeds.
  let predicate: EdgePredicate = Arc::new(|state| {
    if state.data.contains_key("auto_restart_count") {
      "ok".to_string()
    } else {
      "timeout".to_string()
    }
  });

  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node(
    "check",
    Arc::new(FnNode::new(NodeConfig::new("check"), |_| Ok(()))),
  );
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "check");
  engine.connect_conditional(
    "check",
    predicate,
    HashMap::from([("ok".to_string(), "end".to_string())]),
  );
  engine.build_workflow("wf").unwrap();

  let state = engine.execute_workflow("wf", test_state()).await.unwrap();

  assert_eq!(state.status, WorkflowStatus::Completed);
  assert_eq!(state.data["auto_restart_count"], json!(1));
  assert!(state.errors.is_empty());
}

#[tokio::test]
async fn pause_and_resume_continue_from_current_node() {
  let mut engine = fast_engine();
  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node(
    "gate",
    Arc::new(FnNode::new(NodeConfig::new("gate"), |state| {
      if !state.data.contains_key("gate_seen") {
        state.data.insert("gate_seen".into(), json!(true));
        state
          .pause()
          .map_err(|err| NodeError::new(err.to_string()))?;
      }
      Ok(())
    })),
  );
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "gate");
  engine.connect("gate", "end");
  let graph = engine.build_workflow("wf").unwrap();

  let paused = engine.execute_workflow("wf", test_state()).await.unwrap();
  assert_eq!(paused.status, WorkflowStatus::Paused);
  assert_eq!(paused.current_node.as_deref(), Some("gate"));

  let state = engine.resume(&graph, paused).await.unwrap();
  assert_eq!(state.status, WorkflowStatus::Completed);
  assert!(state.data.contains_key("end_time"));
}

#[tokio::test]
async fn resume_rejects_non_paused_state() {
  let mut engine = fast_engine();
  build_linear(&mut engine);
  let graph = engine.graph("linear").unwrap();

  let mut state = test_state();
  state.complete();

  assert!(engine.resume(&graph, state).await.is_err());
}

#[tokio::test]
async fn executions_feed_the_health_monitor() {
  let mut engine = fast_engine();
  build_linear(&mut engine);

  let state = engine
    .execute_workflow("linear", test_state())
    .await
    .unwrap();

  let (status, metrics) = engine
    .health_monitor()
    .get_workflow_health(&state.workflow_id.to_string())
    .unwrap();
  assert_eq!(status, HealthStatus::Healthy);
  assert_eq!(metrics.total_executions, 1);
  assert_eq!(metrics.consecutive_failures, 0);
}

#[tokio::test]
async fn recorder_sees_the_execution_lifecycle() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let mut engine = WorkflowEngine::with_recorder(
    "tenant-a",
    ChannelRecorder::new(tx),
    EngineConfig::default(),
  );
  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "end");
  engine.build_workflow("linear").unwrap();

  let initial = test_state();
  let workflow_id = initial.workflow_id;
  let state = engine.execute_workflow("linear", initial).await.unwrap();
  assert_eq!(state.status, WorkflowStatus::Completed);

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }

  assert!(matches!(
    &events[0],
    RecordEvent::Created { workflow_id: id, .. } if *id == workflow_id
  ));
  // One update per node step.
  let updates = events
    .iter()
    .filter(|e| matches!(e, RecordEvent::Updated { .. }))
    .count();
  assert_eq!(updates, 2);
  assert!(matches!(
    events.last(),
    Some(RecordEvent::Completed { duration_ms, .. }) if *duration_ms >= 0
  ));
}

#[tokio::test]
async fn recompile_replaces_the_stored_graph() {
  let mut engine = fast_engine();
  build_linear(&mut engine);
  let first = engine.graph("linear").unwrap();

  engine.clear_registrations();
  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node(
    "extra",
    Arc::new(FnNode::new(NodeConfig::new("extra"), |state| {
      state.data.insert("extra".into(), json!(true));
      Ok(())
    })),
  );
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "extra");
  engine.connect("extra", "end");
  engine.build_workflow("linear").unwrap();

  let second = engine.graph("linear").unwrap();
  assert_eq!(first.node_count(), 2);
  assert_eq!(second.node_count(), 3);

  // The old snapshot still executes.
  let state = engine.execute(&first, test_state()).await;
  assert_eq!(state.status, WorkflowStatus::Completed);
  assert!(!state.data.contains_key("extra"));
}

#[tokio::test]
async fn agent_costs_accumulate_on_state() {
  use salvia_node::{AgentNode, AgentOutcome};

  let agent_id = Uuid::new_v4();
  let mut engine = fast_engine();
  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node(
    "agent",
    Arc::new(AgentNode::new(
      agent_id,
      Box::new(|input| {
        Ok(AgentOutcome {
          output: json!({ "echo": input }),
          cost_usd: 0.02,
          tokens_used: 350,
        })
      }),
    )),
  );
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "agent");
  engine.connect("agent", "end");
  engine.build_workflow("wf").unwrap();

  let mut initial = test_state();
  initial.data.insert("agent_input".into(), json!("task"));

  let state = engine.execute_workflow("wf", initial).await.unwrap();

  assert_eq!(state.status, WorkflowStatus::Completed);
  assert!((state.total_cost_usd - 0.02).abs() < 1e-9);
  assert_eq!(state.tokens_used, 350);
  assert!(state.agent_results.contains_key(&agent_id.to_string()));
  assert_eq!(
    state.agent_results[&agent_id.to_string()]["output"]["echo"],
    json!("task")
  );
}

#[tokio::test]
async fn region_restricted_node_is_validated() {
  let mut engine = fast_engine();
  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node(
    "regional",
    Arc::new(FnNode::new(
      NodeConfig::new("regional")
        .with_regions(["NG", "KE"])
        .with_retry_on_failure(false),
      |state| {
        state.data.insert("regional_done".into(), json!(true));
        Ok(())
      },
    )),
  );
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect("start", "regional");
  engine.connect("regional", "end");
  engine.build_workflow("wf").unwrap();

  let mut initial = test_state();
  initial.context.insert("region".into(), json!("US"));

  let state = engine.execute_workflow("wf", initial).await.unwrap();

  assert_eq!(state.status, WorkflowStatus::Completed);
  assert!(!state.data.contains_key("regional_done"));
  assert!(
    state
      .last_error()
      .is_some_and(|msg| msg.contains("region validation failed"))
  );
}

#[tokio::test]
async fn conditional_edge_routes_by_label() {
  let mut engine = fast_engine();

  let predicate: EdgePredicate = Arc::new(|state| {
    match state.data.get("amount").and_then(Value::as_i64) {
      Some(n) if n > 100 => "review".to_string(),
      _ => "approve".to_string(),
    }
  });

  engine.register_node("start", Arc::new(StartNode::new()));
  engine.register_node(
    "review",
    Arc::new(FnNode::new(NodeConfig::new("review"), |state| {
      state.data.insert("routed".into(), json!("review"));
      Ok(())
    })),
  );
  engine.register_node(
    "approve",
    Arc::new(FnNode::new(NodeConfig::new("approve"), |state| {
      state.data.insert("routed".into(), json!("approve"));
      Ok(())
    })),
  );
  engine.register_node("end", Arc::new(EndNode::new()));
  engine.connect_conditional(
    "start",
    predicate,
    HashMap::from([
      ("review".to_string(), "review".to_string()),
      ("approve".to_string(), "approve".to_string()),
    ]),
  );
  engine.connect("review", "end");
  engine.connect("approve", "end");
  engine.build_workflow("wf").unwrap();

  let mut big = test_state();
  big.data.insert("amount".into(), json!(500));
  let state = engine.execute_workflow("wf", big).await.unwrap();
  assert_eq!(state.data["routed"], json!("review"));

  let mut small = test_state();
  small.data.insert("amount".into(), json!(10));
  let state = engine.execute_workflow("wf", small).await.unwrap();
  assert_eq!(state.data["routed"], json!("approve"));
}
