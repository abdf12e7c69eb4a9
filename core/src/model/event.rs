// escrow-core/src/model/event.rs

use crate::error::{CoreError, CoreResult};
use crate::ports::store::{Collection, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A payment processor event as delivered to the webhook endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorEvent {
  pub id: String,
  #[serde(rename = "type")]
  pub event_type: String,
  pub data: EventData,
  #[serde(default)]
  pub created: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
  pub object: JsonValue,
}

impl ProcessorEvent {
  pub fn from_slice(payload: &[u8]) -> CoreResult<Self> {
    serde_json::from_slice(payload).map_err(|e| CoreError::InvalidArgument(format!("Malformed event payload: {e}")))
  }

  /// Id of the object the event is about (the payment intent for intent events).
  pub fn object_id(&self) -> Option<&str> {
    self.data.object.get("id").and_then(JsonValue::as_str)
  }

  pub fn metadata(&self, key: &str) -> Option<&str> {
    self
      .data
      .object
      .get("metadata")
      .and_then(|m| m.get(key))
      .and_then(JsonValue::as_str)
      .filter(|v| !v.is_empty())
  }

  /// Captured amount, falling back to the requested amount.
  pub fn amount(&self) -> Option<i64> {
    let object = &self.data.object;
    object
      .get("amount_received")
      .and_then(JsonValue::as_i64)
      .filter(|amount| *amount > 0)
      .or_else(|| object.get("amount").and_then(JsonValue::as_i64))
  }

  pub fn failure_message(&self) -> Option<String> {
    self
      .data
      .object
      .get("last_payment_error")
      .and_then(|e| e.get("message"))
      .and_then(JsonValue::as_str)
      .map(str::to_string)
  }
}

/// Dedup record for consumed events, keyed by event id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEvent {
  pub event_id: String,
  pub event_type: String,
  pub outcome: String,
  pub processed_at: DateTime<Utc>,
}

impl Document for ProcessedEvent {
  const COLLECTION: Collection = Collection::ProcessedEvents;

  fn document_id(&self) -> &str {
    &self.event_id
  }
}
