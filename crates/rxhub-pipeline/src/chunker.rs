//! Chunker
//!
//! Consumes batch-received events, splits each persisted payload into
//! fixed-size slices, persists every slice, and fans out one chunk-ready
//! event per slice. Slice uploads and chunk rows are idempotent on
//! (batch, index), so a redelivered event or a crash mid-fan-out resumes
//! without duplicating chunks.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::db::{batches, chunks};
use crate::error::{PipelineError, PipelineResult};
use crate::events::{
    publish_json, EventLog, Subscription, TOPIC_BATCH_RECEIVED, TOPIC_CHUNK_READY,
};
use crate::models::{BatchReceived, BatchStatus, CatalogRecord, ChunkReady};
use crate::storage::ObjectStore;

/// One planned slice of a batch payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub index: usize,
    pub start: usize,
    pub len: usize,
}

/// Split `total` items into contiguous slices of at most `chunk_size`
/// items; the last slice may be smaller. Indices start at 0 in payload
/// order.
pub fn plan_chunks(total: usize, chunk_size: usize) -> Vec<ChunkPlan> {
    (0..total)
        .step_by(chunk_size)
        .enumerate()
        .map(|(index, start)| ChunkPlan {
            index,
            start,
            len: chunk_size.min(total - start),
        })
        .collect()
}

pub struct Chunker {
    pool: PgPool,
    store: ObjectStore,
    log: Arc<dyn EventLog>,
    chunk_size: usize,
    consumer_group: String,
}

/// What became of one batch-received event.
enum ChunkingOutcome {
    /// Chunks persisted and published.
    Chunked { total_chunks: usize },
    /// Batch payload unreadable or unparseable: batch FAILED, terminal.
    BatchFailed,
    /// Nothing to do (unknown batch or already past chunking).
    Skipped,
}

impl Chunker {
    pub fn new(
        pool: PgPool,
        store: ObjectStore,
        log: Arc<dyn EventLog>,
        chunk_size: usize,
        consumer_group: String,
    ) -> Self {
        Self {
            pool,
            store,
            log,
            chunk_size,
            consumer_group,
        }
    }

    /// Consume batch-received events until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut sub = match self
            .log
            .subscribe(&self.consumer_group, &[TOPIC_BATCH_RECEIVED])
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                error!(error = %e, "Chunker failed to subscribe");
                return;
            },
        };

        info!(group = %self.consumer_group, "Chunker started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                },
                maybe = sub.next() => {
                    let Some(delivery) = maybe else { break };
                    self.handle_delivery(sub.as_mut(), delivery).await;
                },
            }
        }

        sub.leave().await;
        info!("Chunker stopped");
    }

    async fn handle_delivery(
        &self,
        sub: &mut dyn Subscription,
        delivery: crate::events::Delivery,
    ) {
        let event: BatchReceived = match serde_json::from_slice(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Discarding malformed batch-received event");
                let _ = sub.ack(&delivery).await;
                return;
            },
        };

        match self.process_batch(&event).await {
            Ok(outcome) => {
                if let ChunkingOutcome::Chunked { total_chunks } = outcome {
                    info!(
                        batch_id = %event.batch_id,
                        chunks_created = total_chunks,
                        "Chunking completed"
                    );
                }
                let _ = sub.ack(&delivery).await;
            },
            Err(e) => {
                // Infrastructure failure: leave the delivery unacknowledged
                // so the event log redelivers and chunking resumes.
                warn!(
                    error = %e,
                    batch_id = %event.batch_id,
                    "Chunking interrupted, event will be redelivered"
                );
            },
        }
    }

    #[instrument(skip(self, event), fields(batch_id = %event.batch_id))]
    async fn process_batch(&self, event: &BatchReceived) -> PipelineResult<ChunkingOutcome> {
        let Some(batch) = batches::get(&self.pool, event.batch_id).await? else {
            warn!(batch_id = %event.batch_id, "Batch not found, skipping");
            return Ok(ChunkingOutcome::Skipped);
        };

        match batch.status {
            BatchStatus::Received => {
                batches::mark_processing(&self.pool, batch.id).await?;
            },
            // Crash-resume: chunk uploads and rows are idempotent.
            BatchStatus::Processing => {},
            _ => {
                warn!(
                    batch_id = %batch.id,
                    status = %batch.status,
                    "Batch already past chunking, skipping"
                );
                return Ok(ChunkingOutcome::Skipped);
            },
        }

        // An unreadable or unparseable persisted payload is terminal:
        // no chunks, operator intervention required.
        let records = match self.load_records(&batch.payload_key).await {
            Ok(records) => records,
            Err(e) => {
                error!(
                    batch_id = %batch.id,
                    error = %e,
                    "Batch payload unusable, marking batch FAILED"
                );
                batches::mark_failed(&self.pool, batch.id).await?;
                return Ok(ChunkingOutcome::BatchFailed);
            },
        };

        let plans = plan_chunks(records.len(), self.chunk_size);
        let total_chunks = plans.len();

        for plan in plans {
            let slice = &records[plan.start..plan.start + plan.len];
            let payload_key =
                self.store
                    .chunk_key(&event.registry_code, batch.id, plan.index as i32);

            let body = serde_json::to_vec(slice).map_err(PipelineError::MalformedPayload)?;
            self.store
                .put(&payload_key, body, "application/json", &[])
                .await
                .map_err(PipelineError::Storage)?;

            let chunk = chunks::insert(
                &self.pool,
                batch.id,
                plan.index as i32,
                &payload_key,
                plan.len as i32,
            )
            .await?;

            publish_json(
                self.log.as_ref(),
                TOPIC_CHUNK_READY,
                &event.registry_code,
                &ChunkReady {
                    chunk_id: chunk.id,
                    batch_id: batch.id,
                    pharmacy_id: batch.pharmacy_id,
                    registry_code: event.registry_code.clone(),
                    load_type: batch.load_type,
                    payload_key,
                    items_count: plan.len as i32,
                    chunk_index: plan.index as i32,
                    total_chunks: total_chunks as i32,
                },
            )
            .await?;

            info!(
                batch_id = %batch.id,
                chunk_id = %chunk.id,
                chunk_index = plan.index,
                items_count = plan.len,
                "Chunk published"
            );
        }

        Ok(ChunkingOutcome::Chunked { total_chunks })
    }

    async fn load_records(&self, payload_key: &str) -> anyhow::Result<Vec<CatalogRecord>> {
        let bytes = self.store.get(payload_key).await?;
        let records = serde_json::from_slice(&bytes)?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_chunks_exact_multiple() {
        let plans = plan_chunks(2_000, 1_000);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0], ChunkPlan { index: 0, start: 0, len: 1_000 });
        assert_eq!(plans[1], ChunkPlan { index: 1, start: 1_000, len: 1_000 });
    }

    #[test]
    fn test_plan_chunks_last_slice_smaller() {
        let plans = plan_chunks(2_500, 1_000);
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[2], ChunkPlan { index: 2, start: 2_000, len: 500 });
    }

    #[test]
    fn test_plan_chunks_single_partial_chunk() {
        let plans = plan_chunks(10, 1_000);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].len, 10);
    }

    #[test]
    fn test_plan_chunks_empty_payload() {
        assert!(plan_chunks(0, 1_000).is_empty());
    }

    #[test]
    fn test_plan_chunks_matches_ceil_division() {
        for (total, size) in [(1usize, 1usize), (999, 1_000), (1_000, 1_000), (1_001, 1_000), (5_431, 250)] {
            let plans = plan_chunks(total, size);
            assert_eq!(plans.len(), total.div_ceil(size), "total={total} size={size}");

            // Indices are contiguous from 0 and item counts sum to total.
            for (i, plan) in plans.iter().enumerate() {
                assert_eq!(plan.index, i);
            }
            assert_eq!(plans.iter().map(|p| p.len).sum::<usize>(), total);
        }
    }
}
