// escrow_service/src/adapters/postgres_store.rs

//! Document store on Postgres: one `documents` table, SERIALIZABLE transactions with
//! writes buffered until commit.

use async_trait::async_trait;
use escrow_core::ports::{Collection, DocumentStore, FieldFilter, Query, StoreError, Transaction};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

fn store_error(err: sqlx::Error) -> StoreError {
  if let sqlx::Error::Database(db) = &err {
    if matches!(db.code().as_deref(), Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED)) {
      return StoreError::Conflict(db.message().to_string());
    }
  }
  StoreError::Backend(err.to_string())
}

/// Field names are inlined as literals so `body -> 'field'` matches the expression indexes.
fn push_field(qb: &mut QueryBuilder<'static, Postgres>, field: &str) {
  qb.push(format!(" AND body -> '{}'", field.replace('\'', "''")));
}

fn select_query(query: &Query) -> QueryBuilder<'static, Postgres> {
  let mut qb = QueryBuilder::new("SELECT body FROM documents WHERE collection = ");
  qb.push_bind(query.collection.as_str());
  for filter in &query.filters {
    match filter {
      FieldFilter::Eq(field, value) => {
        push_field(&mut qb, field);
        qb.push(" = ");
        qb.push_bind(value.clone());
      }
      FieldFilter::In(field, values) => {
        push_field(&mut qb, field);
        qb.push(" IN (SELECT jsonb_array_elements(");
        qb.push_bind(JsonValue::Array(values.clone()));
        qb.push("))");
      }
    }
  }
  qb.push(" ORDER BY id");
  qb
}

#[derive(Clone)]
pub struct PgDocumentStore {
  pool: PgPool,
}

impl PgDocumentStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await
  }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
  async fn get(&self, collection: Collection, id: &str) -> Result<Option<JsonValue>, StoreError> {
    sqlx::query_scalar::<_, JsonValue>("SELECT body FROM documents WHERE collection = $1 AND id = $2")
      .bind(collection.as_str())
      .bind(id)
      .fetch_optional(&self.pool)
      .await
      .map_err(store_error)
  }

  async fn query(&self, query: &Query) -> Result<Vec<JsonValue>, StoreError> {
    select_query(query)
      .build_query_scalar::<JsonValue>()
      .fetch_all(&self.pool)
      .await
      .map_err(store_error)
  }

  #[instrument(name = "PgDocumentStore::begin", skip(self), err(Display))]
  async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
    let mut tx = self.pool.begin().await.map_err(store_error)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
      .execute(&mut *tx)
      .await
      .map_err(store_error)?;
    Ok(Box::new(PgTransaction {
      tx,
      writes: BTreeMap::new(),
    }))
  }
}

struct PgTransaction {
  tx: sqlx::Transaction<'static, Postgres>,
  /// `None` marks a delete.
  writes: BTreeMap<(Collection, String), Option<JsonValue>>,
}

#[async_trait]
impl Transaction for PgTransaction {
  async fn get(&mut self, collection: Collection, id: &str) -> Result<Option<JsonValue>, StoreError> {
    if let Some(buffered) = self.writes.get(&(collection, id.to_string())) {
      return Ok(buffered.clone());
    }
    sqlx::query_scalar::<_, JsonValue>("SELECT body FROM documents WHERE collection = $1 AND id = $2")
      .bind(collection.as_str())
      .bind(id)
      .fetch_optional(&mut *self.tx)
      .await
      .map_err(store_error)
  }

  async fn query(&mut self, query: &Query) -> Result<Vec<JsonValue>, StoreError> {
    select_query(query)
      .build_query_scalar::<JsonValue>()
      .fetch_all(&mut *self.tx)
      .await
      .map_err(store_error)
  }

  fn put(&mut self, collection: Collection, id: &str, body: JsonValue) {
    self.writes.insert((collection, id.to_string()), Some(body));
  }

  fn delete(&mut self, collection: Collection, id: &str) {
    self.writes.insert((collection, id.to_string()), None);
  }

  async fn commit(self: Box<Self>) -> Result<(), StoreError> {
    let PgTransaction { mut tx, writes } = *self;
    debug!(writes = writes.len(), "Committing document transaction.");
    for ((collection, id), body) in writes {
      match body {
        Some(body) => sqlx::query(
          "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) \
           ON CONFLICT (collection, id) DO UPDATE \
           SET body = EXCLUDED.body, version = documents.version + 1, updated_at = now()",
        )
        .bind(collection.as_str())
        .bind(&id)
        .bind(body)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?,
        None => sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
          .bind(collection.as_str())
          .bind(&id)
          .execute(&mut *tx)
          .await
          .map_err(store_error)?,
      };
    }
    tx.commit().await.map_err(store_error)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use escrow_core::model::OrderStatus;

  #[test]
  fn filters_become_jsonb_predicates() {
    let query = Query::new(Collection::Orders)
      .where_eq("providerId", "p1")
      .where_in("status", [OrderStatus::Active, OrderStatus::InProgress]);
    let qb = select_query(&query);
    assert_eq!(
      qb.sql(),
      "SELECT body FROM documents WHERE collection = $1 AND body -> 'providerId' = $2 \
       AND body -> 'status' IN (SELECT jsonb_array_elements($3)) ORDER BY id"
    );
  }

  #[test]
  fn quotes_in_field_names_are_escaped() {
    let query = Query::new(Collection::TimeEntries).where_eq("order'Id", "o1");
    let qb = select_query(&query);
    assert_eq!(
      qb.sql(),
      "SELECT body FROM documents WHERE collection = $1 AND body -> 'order''Id' = $2 ORDER BY id"
    );
  }
}
