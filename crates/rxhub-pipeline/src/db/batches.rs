//! Batch repository
//!
//! Status transitions are guarded by the expected prior status so that
//! redelivered events and racing workers cannot double-apply them.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Batch, BatchStatus, LoadType};

const BATCH_COLUMNS: &str = "id, pharmacy_id, load_type, idempotency_key, payload_key, \
     payload_checksum, items_total, items_processed, items_failed, status, created_at, updated_at";

/// Input for recording a freshly received batch.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub id: Uuid,
    pub pharmacy_id: Uuid,
    pub load_type: LoadType,
    pub idempotency_key: String,
    pub payload_key: String,
    pub payload_checksum: String,
    pub items_total: i32,
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Batch>, sqlx::Error> {
    sqlx::query_as::<_, Batch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_idempotency_key(
    pool: &PgPool,
    pharmacy_id: Uuid,
    idempotency_key: &str,
) -> Result<Option<Batch>, sqlx::Error> {
    sqlx::query_as::<_, Batch>(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches WHERE pharmacy_id = $1 AND idempotency_key = $2"
    ))
    .bind(pharmacy_id)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
}

/// Record a received batch.
///
/// A duplicate (pharmacy, idempotency key) resolves to the already stored
/// row rather than creating a second batch, so racing duplicate
/// submissions are safe.
pub async fn insert(pool: &PgPool, batch: NewBatch) -> Result<Batch, sqlx::Error> {
    sqlx::query_as::<_, Batch>(&format!(
        r#"
        INSERT INTO batches
            (id, pharmacy_id, load_type, idempotency_key, payload_key,
             payload_checksum, items_total, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'RECEIVED')
        ON CONFLICT (pharmacy_id, idempotency_key)
        DO UPDATE SET updated_at = NOW()
        RETURNING {BATCH_COLUMNS}
        "#
    ))
    .bind(batch.id)
    .bind(batch.pharmacy_id)
    .bind(batch.load_type)
    .bind(&batch.idempotency_key)
    .bind(&batch.payload_key)
    .bind(&batch.payload_checksum)
    .bind(batch.items_total)
    .fetch_one(pool)
    .await
}

/// RECEIVED -> PROCESSING, once. Returns false if the batch already left
/// RECEIVED (e.g. a redelivered batch-received event).
pub async fn mark_processing(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE batches
        SET status = 'PROCESSING', updated_at = NOW()
        WHERE id = $1 AND status = 'RECEIVED'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Terminal failure at chunking time: unreadable or unparseable payload.
/// Operator intervention required; never applied to finished batches.
pub async fn mark_failed(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE batches
        SET status = 'FAILED', updated_at = NOW()
        WHERE id = $1 AND status IN ('RECEIVED', 'PROCESSING')
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Close out a batch after its last chunk completed.
///
/// The target status depends on the failure counter, and the guard only
/// admits PROCESSING/PARTIAL_FAIL, so concurrent workers racing on "did we
/// just finish the last chunk" may all run this safely: the first wins and
/// the rest observe `None` (or re-assert PARTIAL_FAIL, a no-op).
pub async fn finalize(pool: &PgPool, id: Uuid) -> Result<Option<BatchStatus>, sqlx::Error> {
    let status = sqlx::query_scalar::<_, BatchStatus>(
        r#"
        UPDATE batches
        SET status = CASE WHEN items_failed > 0 THEN 'PARTIAL_FAIL' ELSE 'COMPLETED' END,
            updated_at = NOW()
        WHERE id = $1 AND status IN ('PROCESSING', 'PARTIAL_FAIL')
        RETURNING status
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(status)
}
