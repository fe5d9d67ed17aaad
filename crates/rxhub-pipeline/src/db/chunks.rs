//! Chunk repository
//!
//! The batch progress counters ride the chunk's own status transition in a
//! single statement. An already-COMPLETED chunk cannot transition again, so
//! an at-least-once redelivery contributes its item count exactly once.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Chunk;

const CHUNK_COLUMNS: &str = "id, batch_id, chunk_index, payload_key, items_count, status, \
     attempts, processed_at, created_at, updated_at";

/// Insert a chunk row in PENDING.
///
/// Idempotent on (batch, index): a chunker resuming after a crash or a
/// redelivered batch-received event lands on the existing row.
pub async fn insert(
    pool: &PgPool,
    batch_id: Uuid,
    chunk_index: i32,
    payload_key: &str,
    items_count: i32,
) -> Result<Chunk, sqlx::Error> {
    sqlx::query_as::<_, Chunk>(&format!(
        r#"
        INSERT INTO batch_chunks (batch_id, chunk_index, payload_key, items_count, status)
        VALUES ($1, $2, $3, $4, 'PENDING')
        ON CONFLICT (batch_id, chunk_index)
        DO UPDATE SET updated_at = NOW()
        RETURNING {CHUNK_COLUMNS}
        "#
    ))
    .bind(batch_id)
    .bind(chunk_index)
    .bind(payload_key)
    .bind(items_count)
    .fetch_one(pool)
    .await
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Chunk>, sqlx::Error> {
    sqlx::query_as::<_, Chunk>(&format!(
        "SELECT {CHUNK_COLUMNS} FROM batch_chunks WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list_for_batch(pool: &PgPool, batch_id: Uuid) -> Result<Vec<Chunk>, sqlx::Error> {
    sqlx::query_as::<_, Chunk>(&format!(
        "SELECT {CHUNK_COLUMNS} FROM batch_chunks WHERE batch_id = $1 ORDER BY chunk_index"
    ))
    .bind(batch_id)
    .fetch_all(pool)
    .await
}

/// Claim a chunk for processing.
///
/// Returns `None` when the chunk is already terminal: COMPLETED (redelivery
/// after a crash-before-ack) or FAILED (no automatic re-drive).
pub async fn mark_processing(pool: &PgPool, id: Uuid) -> Result<Option<Chunk>, sqlx::Error> {
    sqlx::query_as::<_, Chunk>(&format!(
        r#"
        UPDATE batch_chunks
        SET status = 'PROCESSING', updated_at = NOW()
        WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
        RETURNING {CHUNK_COLUMNS}
        "#
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Flip a chunk to COMPLETED and fold its item count into the batch's
/// items-processed counter, in one statement.
///
/// Returns false when the chunk had already completed, in which case the
/// counter is untouched.
pub async fn complete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        WITH done AS (
            UPDATE batch_chunks
            SET status = 'COMPLETED', processed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
            RETURNING batch_id, items_count
        )
        UPDATE batches b
        SET items_processed = b.items_processed + done.items_count, updated_at = NOW()
        FROM done
        WHERE b.id = done.batch_id
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Flip a chunk to FAILED, bump its attempt counter, and charge its item
/// count to the batch's items-failed counter, dropping the batch to
/// PARTIAL_FAIL, in one statement.
pub async fn fail(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        WITH failed AS (
            UPDATE batch_chunks
            SET status = 'FAILED', attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')
            RETURNING batch_id, items_count
        )
        UPDATE batches b
        SET items_failed = b.items_failed + failed.items_count,
            status = 'PARTIAL_FAIL',
            updated_at = NOW()
        FROM failed
        WHERE b.id = failed.batch_id
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Completed-chunk count for a batch, compared against the total embedded
/// in every chunk-ready event to detect batch completion.
pub async fn count_completed(pool: &PgPool, batch_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM batch_chunks WHERE batch_id = $1 AND status = 'COMPLETED'",
    )
    .bind(batch_id)
    .fetch_one(pool)
    .await
}
