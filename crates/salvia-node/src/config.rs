use serde::{Deserialize, Serialize};

fn default_timeout_seconds() -> u64 {
  300
}

fn default_retry_on_failure() -> bool {
  true
}

/// Immutable configuration for a workflow node.
///
/// Created at graph-build time and never mutated after registration.
/// This struct is the external configuration surface for node authors,
/// so every field deserializes from plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,
  /// Whether the engine should re-run this node when it reports an
  /// error, within the state's retry budget.
  #[serde(default = "default_retry_on_failure")]
  pub retry_on_failure: bool,
  /// Keys that must be present in the state's data map before the
  /// body runs.
  #[serde(default)]
  pub required_inputs: Vec<String>,
  /// Keys this node declares it will produce.
  #[serde(default)]
  pub outputs: Vec<String>,
  /// Whether this node only supports certain regions.
  #[serde(default)]
  pub region_specific: bool,
  #[serde(default)]
  pub supported_regions: Vec<String>,
}

impl NodeConfig {
  /// Minimal config with defaults: 300s timeout, retry on failure, no
  /// input/output contract, no region restriction.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: None,
      timeout_seconds: default_timeout_seconds(),
      retry_on_failure: default_retry_on_failure(),
      required_inputs: Vec::new(),
      outputs: Vec::new(),
      region_specific: false,
      supported_regions: Vec::new(),
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_required_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
    self.required_inputs = inputs.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
    self.outputs = outputs.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_retry_on_failure(mut self, retry: bool) -> Self {
    self.retry_on_failure = retry;
    self
  }

  /// Restrict the node to the given regions.
  pub fn with_regions(mut self, regions: impl IntoIterator<Item = impl Into<String>>) -> Self {
    self.region_specific = true;
    self.supported_regions = regions.into_iter().map(Into::into).collect();
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deserializes_with_defaults() {
    let config: NodeConfig = serde_json::from_str(r#"{"name": "fetch"}"#).unwrap();
    assert_eq!(config.name, "fetch");
    assert_eq!(config.timeout_seconds, 300);
    assert!(config.retry_on_failure);
    assert!(!config.region_specific);
  }

  #[test]
  fn deserializes_full_contract() {
    let config: NodeConfig = serde_json::from_str(
      r#"{
        "name": "invoice",
        "timeout_seconds": 30,
        "retry_on_failure": false,
        "required_inputs": ["order_id"],
        "outputs": ["invoice_id"],
        "region_specific": true,
        "supported_regions": ["NG", "KE"]
      }"#,
    )
    .unwrap();
    assert_eq!(config.required_inputs, vec!["order_id"]);
    assert!(config.region_specific);
    assert_eq!(config.supported_regions, vec!["NG", "KE"]);
  }
}
