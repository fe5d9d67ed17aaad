//! Chunk worker
//!
//! Members of a shared consumer group on the chunk-ready topic: the event
//! log hands each chunk to exactly one worker and redistributes on member
//! join/leave. Processing is safe to repeat; the only cross-worker
//! coordination is the conditional single-statement counter updates in the
//! chunk repository.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{chunks, products};
use crate::error::{PipelineError, PipelineResult};
use crate::events::{Delivery, EventLog, Subscription, TOPIC_CHUNK_READY};
use crate::models::{CatalogRecord, ChunkReady};
use crate::reconcile;
use crate::storage::ObjectStore;

pub struct ChunkWorker {
    id: usize,
    pool: PgPool,
    store: ObjectStore,
    log: Arc<dyn EventLog>,
    consumer_group: String,
}

impl ChunkWorker {
    pub fn new(
        id: usize,
        pool: PgPool,
        store: ObjectStore,
        log: Arc<dyn EventLog>,
        consumer_group: String,
    ) -> Self {
        Self {
            id,
            pool,
            store,
            log,
            consumer_group,
        }
    }

    /// Consume chunk-ready events until shutdown is signalled. The
    /// in-flight chunk is finished (or failed) before leaving; anything
    /// unacknowledged is redistributed by the event log.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut sub = match self
            .log
            .subscribe(&self.consumer_group, &[TOPIC_CHUNK_READY])
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                error!(worker_id = self.id, error = %e, "Worker failed to subscribe");
                return;
            },
        };

        info!(worker_id = self.id, group = %self.consumer_group, "Chunk worker started");

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
        info!(worker_id = self.id, "Chunk worker stopped");
    }

    async fn handle_delivery(&self, sub: &mut dyn Subscription, delivery: Delivery) {
        let event: ChunkReady = match serde_json::from_slice(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    worker_id = self.id,
                    error = %e,
                    "Discarding malformed chunk-ready event"
                );
                let _ = sub.ack(&delivery).await;
                return;
            },
        };

        match self.process_chunk(&event).await {
            Ok(()) => {
                let _ = sub.ack(&delivery).await;
            },
            Err(e) => {
                // State transition could not be recorded; leave the
                // delivery unacknowledged so the chunk is redelivered.
                warn!(
                    worker_id = self.id,
                    chunk_id = %event.chunk_id,
                    error = %e,
                    "Chunk state update failed, chunk will be redelivered"
                );
            },
        }
    }

    #[instrument(skip(self, event), fields(worker_id = self.id, chunk_id = %event.chunk_id, batch_id = %event.batch_id))]
    async fn process_chunk(&self, event: &ChunkReady) -> PipelineResult<()> {
        let Some(chunk) = chunks::mark_processing(&self.pool, event.chunk_id).await? else {
            // Redelivery of a chunk that already completed (or failed, and
            // failed chunks are not auto-retried). The batch completion
            // check is idempotent, so re-run it in case the close-out
            // itself was what crashed.
            debug!("Chunk already terminal, re-checking batch completion");
            return self.check_batch_completion(event).await;
        };

        match self.apply_chunk(event).await {
            Ok(upserted) => {
                chunks::complete(&self.pool, chunk.id).await?;
                info!(upserted, "Chunk processed");
            },
            Err(e) => {
                // Chunk-local failure: this chunk is failed and charged to
                // the batch, sibling chunks are unaffected, and the
                // pipeline does not re-drive it.
                warn!(error = %e, "Chunk application failed");
                chunks::fail(&self.pool, chunk.id).await?;
                return Ok(());
            },
        }

        self.check_batch_completion(event).await
    }

    /// Download the slice and bulk-upsert it into the product table.
    async fn apply_chunk(&self, event: &ChunkReady) -> PipelineResult<u64> {
        let bytes = self
            .store
            .get(&event.payload_key)
            .await
            .map_err(PipelineError::Storage)?;

        let records: Vec<CatalogRecord> =
            serde_json::from_slice(&bytes).map_err(PipelineError::MalformedPayload)?;

        let upserted =
            products::bulk_upsert(&self.pool, event.pharmacy_id, event.batch_id, &records).await?;

        Ok(upserted)
    }

    /// Whichever worker observes the last chunk completing triggers the
    /// close-out; there is no leader election and the close-out is safe to
    /// run more than once.
    async fn check_batch_completion(&self, event: &ChunkReady) -> PipelineResult<()> {
        let completed = chunks::count_completed(&self.pool, event.batch_id).await?;
        if completed == i64::from(event.total_chunks) {
            reconcile::close_out_batch(
                &self.pool,
                event.batch_id,
                event.pharmacy_id,
                event.load_type,
            )
            .await?;
        }
        Ok(())
    }
}
