// escrow-core/src/memory/store.rs

//! Process-local document store with optimistic, serializable transactions.
//!
//! Every document carries a version from a store-wide counter, and every collection a
//! generation bumped on each write into it. A transaction remembers the versions of
//! the documents it read and the generations of the collections it queried; commit
//! fails with [`StoreError::Conflict`] when any of them moved.

use crate::ports::store::{Collection, Document, DocumentStore, Query, StoreError, Transaction};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{event, Level};

#[derive(Debug, Clone)]
struct Versioned {
  version: u64,
  body: JsonValue,
}

#[derive(Debug, Default)]
struct StoreState {
  documents: HashMap<Collection, BTreeMap<String, Versioned>>,
  generations: HashMap<Collection, u64>,
  clock: u64,
}

impl StoreState {
  fn version_of(&self, collection: Collection, id: &str) -> u64 {
    self
      .documents
      .get(&collection)
      .and_then(|docs| docs.get(id))
      .map_or(0, |doc| doc.version)
  }

  fn generation_of(&self, collection: Collection) -> u64 {
    self.generations.get(&collection).copied().unwrap_or(0)
  }

  fn get(&self, collection: Collection, id: &str) -> Option<&Versioned> {
    self.documents.get(&collection).and_then(|docs| docs.get(id))
  }

  fn query(&self, query: &Query) -> Vec<JsonValue> {
    self
      .documents
      .get(&query.collection)
      .map(|docs| {
        docs
          .values()
          .filter(|doc| query.matches(&doc.body))
          .map(|doc| doc.body.clone())
          .collect()
      })
      .unwrap_or_default()
  }

  fn write(&mut self, collection: Collection, id: String, body: Option<JsonValue>) {
    self.clock += 1;
    let version = self.clock;
    *self.generations.entry(collection).or_insert(0) += 1;
    let docs = self.documents.entry(collection).or_default();
    match body {
      Some(body) => {
        docs.insert(id, Versioned { version, body });
      }
      None => {
        docs.remove(&id);
      }
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
  state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Writes a document outside any transaction. Meant for seeding.
  pub fn insert<D: Document>(&self, doc: &D) -> Result<(), StoreError> {
    let body = serde_json::to_value(doc)?;
    self.state.lock().write(D::COLLECTION, doc.document_id().to_string(), Some(body));
    Ok(())
  }

  /// Reads and decodes a committed document, if present.
  pub fn snapshot<D: Document>(&self, id: &str) -> Option<D> {
    let body = self.state.lock().get(D::COLLECTION, id).map(|doc| doc.body.clone())?;
    match serde_json::from_value(body) {
      Ok(doc) => Some(doc),
      Err(e) => {
        event!(Level::WARN, collection = %D::COLLECTION, id, error = %e, "Stored document does not decode.");
        None
      }
    }
  }

  pub fn count(&self, collection: Collection) -> usize {
    self.state.lock().documents.get(&collection).map_or(0, BTreeMap::len)
  }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
  async fn get(&self, collection: Collection, id: &str) -> Result<Option<JsonValue>, StoreError> {
    Ok(self.state.lock().get(collection, id).map(|doc| doc.body.clone()))
  }

  async fn query(&self, query: &Query) -> Result<Vec<JsonValue>, StoreError> {
    Ok(self.state.lock().query(query))
  }

  async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
    Ok(Box::new(InMemoryTransaction {
      state: Arc::clone(&self.state),
      read_versions: HashMap::new(),
      read_generations: HashMap::new(),
      writes: Vec::new(),
    }))
  }
}

pub struct InMemoryTransaction {
  state: Arc<Mutex<StoreState>>,
  read_versions: HashMap<(Collection, String), u64>,
  read_generations: HashMap<Collection, u64>,
  writes: Vec<(Collection, String, Option<JsonValue>)>,
}

impl InMemoryTransaction {
  fn pending(&self, collection: Collection, id: &str) -> Option<&Option<JsonValue>> {
    self
      .writes
      .iter()
      .rev()
      .find(|(c, doc_id, _)| *c == collection && doc_id == id)
      .map(|(_, _, body)| body)
  }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
  async fn get(&mut self, collection: Collection, id: &str) -> Result<Option<JsonValue>, StoreError> {
    if let Some(body) = self.pending(collection, id) {
      return Ok(body.clone());
    }
    let state = self.state.lock();
    let current = state.get(collection, id);
    self
      .read_versions
      .entry((collection, id.to_string()))
      .or_insert_with(|| current.map_or(0, |doc| doc.version));
    Ok(current.map(|doc| doc.body.clone()))
  }

  async fn query(&mut self, query: &Query) -> Result<Vec<JsonValue>, StoreError> {
    let state = self.state.lock();
    self
      .read_generations
      .entry(query.collection)
      .or_insert_with(|| state.generation_of(query.collection));
    Ok(state.query(query))
  }

  fn put(&mut self, collection: Collection, id: &str, body: JsonValue) {
    self.writes.push((collection, id.to_string(), Some(body)));
  }

  fn delete(&mut self, collection: Collection, id: &str) {
    self.writes.push((collection, id.to_string(), None));
  }

  async fn commit(self: Box<Self>) -> Result<(), StoreError> {
    let this = *self;
    let mut state = this.state.lock();

    for ((collection, id), seen) in &this.read_versions {
      if state.version_of(*collection, id) != *seen {
        return Err(StoreError::Conflict(format!("{collection}/{id} changed after it was read")));
      }
    }
    for (collection, seen) in &this.read_generations {
      if state.generation_of(*collection) != *seen {
        return Err(StoreError::Conflict(format!("{collection} changed after it was queried")));
      }
    }

    for (collection, id, body) in this.writes {
      state.write(collection, id, body);
    }
    Ok(())
  }
}
