//! Messages and sync tags delivered to the agent by its pages.

use serde::Deserialize;
use serde_json::Value;

/// Structured directive posted by a controlled page, e.g. `{"type": "SKIP_WAITING"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
  /// Activate now instead of waiting for controlled pages to close
  SkipWaiting,
  #[serde(other)]
  Unknown,
}

impl AgentMessage {
  /// Anything that is not a recognized directive is `Unknown`.
  pub fn from_value(data: &Value) -> Self {
    AgentMessage::deserialize(data).unwrap_or(AgentMessage::Unknown)
  }
}

/// Tag of a background sync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTag {
  /// License key synchronization; no sync logic exists behind it yet
  Licenses,
  Other(String),
}

impl SyncTag {
  pub fn parse(tag: &str) -> Self {
    match tag {
      "sync-licenses" => SyncTag::Licenses,
      other => SyncTag::Other(other.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_skip_waiting_message() {
    assert_eq!(
      AgentMessage::from_value(&json!({ "type": "SKIP_WAITING" })),
      AgentMessage::SkipWaiting
    );
  }

  #[test]
  fn test_unrecognized_messages() {
    assert_eq!(
      AgentMessage::from_value(&json!({ "type": "CLAIM_EVERYTHING" })),
      AgentMessage::Unknown
    );
    assert_eq!(AgentMessage::from_value(&json!({})), AgentMessage::Unknown);
    assert_eq!(AgentMessage::from_value(&json!("SKIP_WAITING")), AgentMessage::Unknown);
    assert_eq!(AgentMessage::from_value(&Value::Null), AgentMessage::Unknown);
  }

  #[test]
  fn test_sync_tags() {
    assert_eq!(SyncTag::parse("sync-licenses"), SyncTag::Licenses);
    assert_eq!(
      SyncTag::parse("sync-settings"),
      SyncTag::Other("sync-settings".to_string())
    );
  }
}
