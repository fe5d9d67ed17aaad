//! Intake & idempotency guard
//!
//! Accepts a raw catalog payload pushed by a pharmacy ERP, deduplicates it
//! by (pharmacy, idempotency key), persists the raw bytes to the object
//! store, records the batch, and hands off to chunking through the event
//! log. Validation failures reject the submission without creating any
//! state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use rxhub_common::checksum;

use crate::db::{batches, batches::NewBatch, pharmacies};
use crate::error::IntakeError;
use crate::events::{EventLog, EventLogError, Message, TOPIC_BATCH_RECEIVED};
use crate::models::{BatchReceived, CatalogRecord, IngestReceipt, LoadType};
use crate::storage::ObjectStore;

/// A catalog submission as received from the boundary layer.
#[derive(Debug, Clone)]
pub struct IntakeRequest {
    pub load_type: LoadType,
    /// Client-supplied idempotency key; derived when absent.
    pub idempotency_key: Option<String>,
    /// Raw payload bytes: a JSON array of catalog records.
    pub payload: Vec<u8>,
}

pub struct IntakeService {
    pool: PgPool,
    store: ObjectStore,
    log: Arc<dyn EventLog>,
}

impl IntakeService {
    pub fn new(pool: PgPool, store: ObjectStore, log: Arc<dyn EventLog>) -> Self {
        Self { pool, store, log }
    }

    /// Accept a catalog submission.
    ///
    /// A resubmission carrying an idempotency key already recorded for the
    /// pharmacy returns the stored batch's receipt unchanged: no object,
    /// batch, or event is created.
    #[instrument(skip(self, request), fields(load_type = %request.load_type))]
    pub async fn submit(&self, request: IntakeRequest) -> Result<IngestReceipt, IntakeError> {
        let records = parse_payload(&request.payload)?;
        let registry_code = single_registry_code(&records)?;

        let pharmacy = pharmacies::find_by_registry_code(&self.pool, registry_code)
            .await?
            .ok_or_else(|| IntakeError::PharmacyNotFound(registry_code.to_string()))?;

        let idempotency_key = request.idempotency_key.clone().unwrap_or_else(|| {
            derive_idempotency_key(registry_code, Utc::now(), &request.payload)
        });

        if let Some(existing) =
            batches::find_by_idempotency_key(&self.pool, pharmacy.id, &idempotency_key).await?
        {
            info!(
                batch_id = %existing.id,
                pharmacy = %registry_code,
                "Duplicate submission resolved to existing batch"
            );
            return Ok(IngestReceipt {
                batch_id: existing.id,
                status: existing.status,
                received_at: existing.created_at,
            });
        }

        let payload_checksum = checksum::sha256_hex(&request.payload);
        let batch_id = Uuid::new_v4();
        let payload_key = self.store.batch_key(registry_code, batch_id);

        self.store
            .put(
                &payload_key,
                request.payload.clone(),
                "application/json",
                &[
                    ("pharmacy", registry_code),
                    ("load-type", &request.load_type.to_string()),
                    ("checksum", &payload_checksum),
                ],
            )
            .await
            .map_err(IntakeError::Storage)?;

        let batch = batches::insert(
            &self.pool,
            NewBatch {
                id: batch_id,
                pharmacy_id: pharmacy.id,
                load_type: request.load_type,
                idempotency_key,
                payload_key,
                payload_checksum,
                items_total: records.len() as i32,
            },
        )
        .await?;

        let event = BatchReceived {
            batch_id: batch.id,
            pharmacy_id: pharmacy.id,
            registry_code: registry_code.to_string(),
            load_type: batch.load_type,
            occurred_at: Utc::now(),
        };
        let payload = serde_json::to_vec(&event).map_err(EventLogError::Serialization)?;
        self.log
            .publish(
                Message::new(TOPIC_BATCH_RECEIVED, registry_code, payload)
                    .with_header("event-type", "batch.received")
                    .with_header("batch-id", &batch.id.to_string()),
            )
            .await?;

        info!(
            batch_id = %batch.id,
            pharmacy = %registry_code,
            items = records.len(),
            "Batch received"
        );

        Ok(IngestReceipt {
            batch_id: batch.id,
            status: batch.status,
            received_at: batch.created_at,
        })
    }
}

fn parse_payload(payload: &[u8]) -> Result<Vec<CatalogRecord>, IntakeError> {
    let records: Vec<CatalogRecord> =
        serde_json::from_slice(payload).map_err(IntakeError::MalformedPayload)?;
    if records.is_empty() {
        return Err(IntakeError::EmptyPayload);
    }
    Ok(records)
}

/// Every record in a payload must declare the same owning pharmacy.
fn single_registry_code(records: &[CatalogRecord]) -> Result<&str, IntakeError> {
    let mut code: Option<&str> = None;
    for (index, record) in records.iter().enumerate() {
        if record.registry_code.trim().is_empty() {
            return Err(IntakeError::MissingRegistryCode { index });
        }
        match code {
            None => code = Some(&record.registry_code),
            Some(first) if first != record.registry_code => {
                return Err(IntakeError::MixedRegistryCodes {
                    first: first.to_string(),
                    other: record.registry_code.clone(),
                });
            },
            Some(_) => {},
        }
    }
    // parse_payload rejected empty payloads already
    code.ok_or(IntakeError::EmptyPayload)
}

/// Auto-derived key for submissions without an explicit one.
///
/// Embeds the submission instant, so identical payloads resubmitted
/// without a key intentionally become distinct batches; only explicit
/// keys deduplicate content.
fn derive_idempotency_key(registry_code: &str, at: DateTime<Utc>, payload: &[u8]) -> String {
    let digest = format!("{:x}", md5::compute(payload));
    format!(
        "auto-{}-{}-{}",
        registry_code,
        at.timestamp_millis(),
        &digest[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(code: &str, product_id: &str) -> CatalogRecord {
        CatalogRecord {
            registry_code: code.to_string(),
            product_id: product_id.to_string(),
            title: format!("Product {}", product_id),
            description: None,
            ean: None,
            price: 9.9,
            promo_price: 0.0,
            wholesale_price: 0.0,
            wholesale_min: 0,
            quantity: 10.0,
            brand: None,
            category: None,
            image_url: None,
        }
    }

    #[test]
    fn test_parse_payload_rejects_empty_array() {
        assert!(matches!(
            parse_payload(b"[]"),
            Err(IntakeError::EmptyPayload)
        ));
    }

    #[test]
    fn test_parse_payload_rejects_non_array() {
        assert!(matches!(
            parse_payload(b"{\"registryCode\": \"1\"}"),
            Err(IntakeError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_payload(b"not json"),
            Err(IntakeError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_single_registry_code_accepts_uniform_payload() {
        let records = vec![record("111", "A"), record("111", "B")];
        assert_eq!(single_registry_code(&records).unwrap(), "111");
    }

    #[test]
    fn test_single_registry_code_rejects_mixed_pharmacies() {
        let records = vec![record("111", "A"), record("222", "B")];
        assert!(matches!(
            single_registry_code(&records),
            Err(IntakeError::MixedRegistryCodes { .. })
        ));
    }

    #[test]
    fn test_single_registry_code_rejects_blank_code() {
        let records = vec![record("", "A")];
        assert!(matches!(
            single_registry_code(&records),
            Err(IntakeError::MissingRegistryCode { index: 0 })
        ));
    }

    #[test]
    fn test_derive_idempotency_key_shape() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let key = derive_idempotency_key("12345678", at, b"[]");
        assert!(key.starts_with("auto-12345678-"));
        let hash = key.rsplit('-').next().unwrap();
        assert_eq!(hash.len(), 8);
    }

    #[test]
    fn test_derive_idempotency_key_varies_with_time() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap();
        // Same payload, different submission instants: distinct batches.
        assert_ne!(
            derive_idempotency_key("1", t0, b"[]"),
            derive_idempotency_key("1", t1, b"[]")
        );
    }

    #[test]
    fn test_derive_idempotency_key_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            derive_idempotency_key("1", at, b"payload"),
            derive_idempotency_key("1", at, b"payload")
        );
    }
}
