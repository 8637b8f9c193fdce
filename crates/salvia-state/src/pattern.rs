//! Failure pattern classification.
//!
//! Maps a raw error message (and the current error history) into one
//! of four failure patterns. The keyword rules are checked in a fixed
//! priority: transient before resource before persistent, with the
//! cascading check last. An error like "invalid configuration timeout"
//! therefore classifies as transient, not persistent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Keywords indicating a transient failure (network, throttling).
const TRANSIENT_KEYWORDS: &[&str] = &[
  "timeout",
  "connection",
  "network",
  "temporary",
  "unavailable",
  "rate limit",
  "throttle",
  "busy",
  "retry",
];

/// Keywords indicating a resource exhaustion failure.
const RESOURCE_KEYWORDS: &[&str] = &[
  "memory", "disk", "cpu", "quota", "limit", "capacity", "resource", "storage", "space",
];

/// Keywords indicating a persistent failure (bad input or config).
const PERSISTENT_KEYWORDS: &[&str] = &[
  "validation",
  "invalid",
  "missing",
  "required",
  "format",
  "syntax",
  "configuration",
  "permission",
  "unauthorized",
];

/// Failure pattern derived heuristically from an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePattern {
  Transient,
  Resource,
  Persistent,
  Cascading,
}

impl FailurePattern {
  /// Classify an error message into a failure pattern.
  ///
  /// `prior_errors` is the number of error-log entries already on the
  /// state; two or more turns an otherwise-unmatched error into a
  /// cascading failure. Classification is deterministic: the same
  /// message and history always yield the same pattern.
  pub fn classify(error_text: &str, prior_errors: usize) -> Self {
    let error_lower = error_text.to_lowercase();

    if TRANSIENT_KEYWORDS.iter().any(|k| error_lower.contains(k)) {
      return FailurePattern::Transient;
    }
    if RESOURCE_KEYWORDS.iter().any(|k| error_lower.contains(k)) {
      return FailurePattern::Resource;
    }
    if PERSISTENT_KEYWORDS.iter().any(|k| error_lower.contains(k)) {
      return FailurePattern::Persistent;
    }
    if prior_errors >= 2 {
      return FailurePattern::Cascading;
    }

    // Unknown patterns default to transient so they get a retry.
    FailurePattern::Transient
  }

  /// All patterns, for aggregation over failure events.
  pub fn all() -> [FailurePattern; 4] {
    [
      FailurePattern::Transient,
      FailurePattern::Resource,
      FailurePattern::Persistent,
      FailurePattern::Cascading,
    ]
  }
}

impl fmt::Display for FailurePattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      FailurePattern::Transient => "transient",
      FailurePattern::Resource => "resource",
      FailurePattern::Persistent => "persistent",
      FailurePattern::Cascading => "cascading",
    };
    f.write_str(s)
  }
}

/// Recovery strategy chosen from a failure pattern and current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
  Retry,
  Rollback,
  Skip,
  Fallback,
}

impl fmt::Display for RecoveryStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      RecoveryStrategy::Retry => "retry",
      RecoveryStrategy::Rollback => "rollback",
      RecoveryStrategy::Skip => "skip",
      RecoveryStrategy::Fallback => "fallback",
    };
    f.write_str(s)
  }
}
