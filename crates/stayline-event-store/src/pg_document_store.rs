//! `PostgreSQL` implementation of the `DocumentStore` trait.
//!
//! Every document kind shares the `projection_documents` table and is told
//! apart by its `kind` column.

use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use stayline_core::document::{DocumentStore, NetOperation, Versioned};
use stayline_core::error::DomainError;

use crate::db_error;

/// JSONB documents of one kind.
#[derive(Debug)]
pub struct PgDocumentStore<V> {
    pool: PgPool,
    kind: &'static str,
    _document: PhantomData<fn() -> V>,
}

impl<V> Clone for PgDocumentStore<V> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            kind: self.kind,
            _document: PhantomData,
        }
    }
}

impl<V> PgDocumentStore<V> {
    /// Creates a store for documents tagged `kind`.
    #[must_use]
    pub fn new(pool: PgPool, kind: &'static str) -> Self {
        Self {
            pool,
            kind,
            _document: PhantomData,
        }
    }
}

fn decode_row<V: DeserializeOwned>(row: &PgRow) -> Result<(Uuid, Versioned<V>), DomainError> {
    let id: Uuid = row.try_get("id").map_err(db_error)?;
    let Json(document): Json<V> = row.try_get("data").map_err(db_error)?;
    let last_position: i64 = row.try_get("last_position").map_err(db_error)?;
    Ok((
        id,
        Versioned {
            document,
            last_position,
        },
    ))
}

#[async_trait]
impl<V> DocumentStore<V> for PgDocumentStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn load(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Versioned<V>>, DomainError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT id, data, last_position FROM projection_documents \
             WHERE kind = $1 AND id = ANY($2)",
        )
        .bind(self.kind)
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(decode_row).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Versioned<V>>, DomainError> {
        let row = sqlx::query(
            "SELECT id, data, last_position FROM projection_documents \
             WHERE kind = $1 AND id = $2",
        )
        .bind(self.kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref()
            .map(|row| decode_row(row).map(|(_, document)| document))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Versioned<V>>, DomainError> {
        let rows = sqlx::query(
            "SELECT id, data, last_position FROM projection_documents \
             WHERE kind = $1 ORDER BY last_position ASC",
        )
        .bind(self.kind)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| decode_row(row).map(|(_, document)| document))
            .collect()
    }

    #[instrument(skip(self, operations), fields(kind = self.kind, count = operations.len()))]
    async fn commit(&self, operations: Vec<NetOperation<V>>) -> Result<(), DomainError> {
        if operations.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for operation in &operations {
            match operation {
                NetOperation::Insert { id, document } => {
                    sqlx::query(
                        "INSERT INTO projection_documents (kind, id, data, last_position) \
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(self.kind)
                    .bind(id)
                    .bind(Json(&document.document))
                    .bind(document.last_position)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
                }
                NetOperation::Update { id, document } => {
                    let result = sqlx::query(
                        "UPDATE projection_documents \
                         SET data = $3, last_position = $4, updated_at = NOW() \
                         WHERE kind = $1 AND id = $2",
                    )
                    .bind(self.kind)
                    .bind(id)
                    .bind(Json(&document.document))
                    .bind(document.last_position)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
                    if result.rows_affected() != 1 {
                        return Err(DomainError::Infrastructure(format!(
                            "{} document {id} vanished before update",
                            self.kind
                        )));
                    }
                }
                NetOperation::Delete { id } => {
                    sqlx::query("DELETE FROM projection_documents WHERE kind = $1 AND id = $2")
                        .bind(self.kind)
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_error)?;
                }
            }
        }

        tx.commit().await.map_err(db_error)?;
        debug!("committed document operations");
        Ok(())
    }
}
