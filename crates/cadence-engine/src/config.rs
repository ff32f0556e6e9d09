use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// How often the engine loop fails waits past their deadline.
  pub timeout_check_interval_ms: u64,

  /// How often `wait_for_completion` polls the store.
  pub completion_poll_interval_ms: u64,

  /// Expression keys that match ancestors by group instead of identifier,
  /// e.g. `stage` -> `STAGE`.
  pub group_aliases: HashMap<String, String>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      timeout_check_interval_ms: 1_000,
      completion_poll_interval_ms: 25,
      group_aliases: HashMap::from([
        ("stage".to_string(), "STAGE".to_string()),
        ("stepGroup".to_string(), "STEP_GROUP".to_string()),
      ]),
    }
  }
}

impl EngineConfig {
  pub fn timeout_check_interval(&self) -> Duration {
    Duration::from_millis(self.timeout_check_interval_ms.max(1))
  }

  pub fn completion_poll_interval(&self) -> Duration {
    Duration::from_millis(self.completion_poll_interval_ms.max(1))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_config_keeps_defaults() {
    let config: EngineConfig =
      serde_json::from_str(r#"{ "timeout_check_interval_ms": 50 }"#).unwrap();
    assert_eq!(config.timeout_check_interval(), Duration::from_millis(50));
    assert_eq!(config.completion_poll_interval_ms, 25);
    assert_eq!(config.group_aliases["stage"], "STAGE");
  }
}
