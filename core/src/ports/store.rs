// escrow-core/src/ports/store.rs

//! Document store contract.
//!
//! Documents are JSON objects addressed by `(collection, id)`. Reads inside a
//! [`Transaction`] are validated at commit: if anything read (a document, or the
//! result set of a query) changed concurrently, the commit fails with
//! [`StoreError::Conflict`] and nothing is written. [`run_transaction`] retries such
//! attempts from scratch.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tracing::{event, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
  Orders,
  Drafts,
  Providers,
  Chats,
  OrderTimeTracking,
  TimeEntries,
  ApprovalRequests,
  PaymentLocks,
  ProcessedEvents,
}

impl Collection {
  pub const ALL: [Collection; 9] = [
    Collection::Orders,
    Collection::Drafts,
    Collection::Providers,
    Collection::Chats,
    Collection::OrderTimeTracking,
    Collection::TimeEntries,
    Collection::ApprovalRequests,
    Collection::PaymentLocks,
    Collection::ProcessedEvents,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Collection::Orders => "orders",
      Collection::Drafts => "drafts",
      Collection::Providers => "providers",
      Collection::Chats => "chats",
      Collection::OrderTimeTracking => "orderTimeTracking",
      Collection::TimeEntries => "timeEntries",
      Collection::ApprovalRequests => "approvalRequests",
      Collection::PaymentLocks => "paymentLocks",
      Collection::ProcessedEvents => "processedEvents",
    }
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum StoreError {
  /// A concurrent write invalidated something this transaction read.
  #[error("Transaction conflict: {0}")]
  Conflict(String),

  #[error("Store backend failure: {0}")]
  Backend(String),

  #[error("Document (de)serialization failed: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// A typed record living in one collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
  const COLLECTION: Collection;

  fn document_id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
  Eq(String, JsonValue),
  In(String, Vec<JsonValue>),
}

impl FieldFilter {
  pub fn field(&self) -> &str {
    match self {
      FieldFilter::Eq(field, _) | FieldFilter::In(field, _) => field,
    }
  }

  pub fn matches(&self, doc: &JsonValue) -> bool {
    let Some(actual) = doc.get(self.field()) else {
      return false;
    };
    match self {
      FieldFilter::Eq(_, expected) => actual == expected,
      FieldFilter::In(_, candidates) => candidates.iter().any(|c| c == actual),
    }
  }
}

/// Conjunction of top-level field filters over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
  pub collection: Collection,
  pub filters: Vec<FieldFilter>,
}

impl Query {
  pub fn new(collection: Collection) -> Self {
    Self {
      collection,
      filters: Vec::new(),
    }
  }

  pub fn where_eq(mut self, field: &str, value: impl Serialize) -> Self {
    let value = serde_json::to_value(value).unwrap_or(JsonValue::Null);
    self.filters.push(FieldFilter::Eq(field.to_string(), value));
    self
  }

  pub fn where_in<V: Serialize>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
    let values = values
      .into_iter()
      .map(|v| serde_json::to_value(v).unwrap_or(JsonValue::Null))
      .collect();
    self.filters.push(FieldFilter::In(field.to_string(), values));
    self
  }

  pub fn matches(&self, doc: &JsonValue) -> bool {
    self.filters.iter().all(|f| f.matches(doc))
  }
}

/// A read-validate-write unit of work. Writes are buffered until [`Transaction::commit`];
/// dropping an uncommitted transaction discards them.
#[async_trait]
pub trait Transaction: Send {
  /// Reads a document, observing this transaction's own buffered writes.
  async fn get(&mut self, collection: Collection, id: &str) -> Result<Option<JsonValue>, StoreError>;

  /// Runs a query against committed state; buffered writes are not visible.
  async fn query(&mut self, query: &Query) -> Result<Vec<JsonValue>, StoreError>;

  fn put(&mut self, collection: Collection, id: &str, body: JsonValue);

  fn delete(&mut self, collection: Collection, id: &str);

  async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
  async fn get(&self, collection: Collection, id: &str) -> Result<Option<JsonValue>, StoreError>;

  async fn query(&self, query: &Query) -> Result<Vec<JsonValue>, StoreError>;

  async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
}

fn decode<D: Document>(body: JsonValue) -> CoreResult<D> {
  serde_json::from_value(body).map_err(|e| CoreError::Store(StoreError::Serialization(e)))
}

/// Typed access on top of [`Transaction`].
#[async_trait]
pub trait TransactionExt: Transaction {
  async fn load<D: Document>(&mut self, id: &str) -> CoreResult<Option<D>> {
    match self.get(D::COLLECTION, id).await? {
      Some(body) => Ok(Some(decode(body)?)),
      None => Ok(None),
    }
  }

  async fn load_where<D: Document>(&mut self, query: Query) -> CoreResult<Vec<D>> {
    let rows = self.query(&query).await?;
    rows.into_iter().map(decode).collect()
  }

  fn save<D: Document>(&mut self, doc: &D) -> CoreResult<()> {
    let body = serde_json::to_value(doc).map_err(StoreError::from)?;
    self.put(D::COLLECTION, doc.document_id(), body);
    Ok(())
  }
}

impl<T: Transaction + ?Sized> TransactionExt for T {}

/// Typed, non-transactional reads on top of [`DocumentStore`].
#[async_trait]
pub trait StoreExt: DocumentStore {
  async fn fetch<D: Document>(&self, id: &str) -> CoreResult<Option<D>> {
    match self.get(D::COLLECTION, id).await? {
      Some(body) => Ok(Some(decode(body)?)),
      None => Ok(None),
    }
  }

  async fn fetch_where<D: Document>(&self, query: Query) -> CoreResult<Vec<D>> {
    let rows = self.query(&query).await?;
    rows.into_iter().map(decode).collect()
  }
}

impl<S: DocumentStore + ?Sized> StoreExt for S {}

/// Runs `attempt` until it succeeds or fails with anything other than a commit
/// conflict, at most `max_attempts` times. Each attempt must begin its own transaction.
pub async fn run_transaction<T, F, Fut>(max_attempts: u32, mut attempt: F) -> CoreResult<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = CoreResult<T>>,
{
  let max_attempts = max_attempts.max(1);
  let mut tries = 0;
  loop {
    tries += 1;
    match attempt().await {
      Err(err) if err.is_store_conflict() && tries < max_attempts => {
        event!(Level::DEBUG, attempt = tries, error = %err, "Transaction conflicted, retrying.");
      }
      Err(err) if err.is_store_conflict() => {
        event!(Level::WARN, attempts = tries, error = %err, "Transaction kept conflicting, giving up.");
        return Err(err);
      }
      other => return other,
    }
  }
}
