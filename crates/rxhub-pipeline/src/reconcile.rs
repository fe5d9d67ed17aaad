//! Reconciler
//!
//! Runs when a batch's last chunk completes. Full loads assert the whole
//! catalog, so any product of the pharmacy still active but not touched by
//! the batch no longer exists upstream and is soft-deleted. Delta loads
//! only add/update and skip straight to close-out.
//!
//! Both steps are idempotent: the soft-delete predicate reads current
//! state, and the terminal status flip is guarded by the expected prior
//! status, so racing workers can all run this.

use sqlx::PgPool;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::{batches, products};
use crate::error::PipelineResult;
use crate::models::{BatchStatus, LoadType};

/// Reconcile (full loads only) and move the batch to its terminal status.
///
/// Returns the terminal status applied, or `None` when another worker
/// already closed the batch out.
#[instrument(skip(pool))]
pub async fn close_out_batch(
    pool: &PgPool,
    batch_id: Uuid,
    pharmacy_id: Uuid,
    load_type: LoadType,
) -> PipelineResult<Option<BatchStatus>> {
    if load_type == LoadType::Full {
        let retired = products::mark_unreferenced_inactive(pool, pharmacy_id, batch_id).await?;
        if retired > 0 {
            info!(
                %batch_id,
                retired,
                "Soft-deleted products absent from full load"
            );
        }
    }

    let status = batches::finalize(pool, batch_id).await?;
    match status {
        Some(status) => info!(%batch_id, %status, "Batch closed out"),
        None => debug!(%batch_id, "Batch already in a terminal state"),
    }

    Ok(status)
}
