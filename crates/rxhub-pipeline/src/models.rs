//! Domain models for the catalog pipeline
//!
//! Row types for the batch/chunk/product tables plus the wire shapes that
//! cross the pipeline's boundaries: the ERP catalog record and the two
//! event-log payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How a batch relates to the pharmacy's catalog.
///
/// `Full` is a complete snapshot and triggers reconciliation on completion;
/// `Delta` only adds or updates records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum LoadType {
    Full,
    Delta,
}

impl std::fmt::Display for LoadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadType::Full => write!(f, "full"),
            LoadType::Delta => write!(f, "delta"),
        }
    }
}

impl std::str::FromStr for LoadType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(LoadType::Full),
            "delta" => Ok(LoadType::Delta),
            other => Err(format!("invalid load type: {}", other)),
        }
    }
}

/// Batch lifecycle states.
///
/// `PartialFail` dominates `Completed`: once any item fails the batch can
/// never report clean completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum BatchStatus {
    #[serde(rename = "RECEIVED")]
    #[sqlx(rename = "RECEIVED")]
    Received,
    #[serde(rename = "PROCESSING")]
    #[sqlx(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    #[sqlx(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "PARTIAL_FAIL")]
    #[sqlx(rename = "PARTIAL_FAIL")]
    PartialFail,
    #[serde(rename = "FAILED")]
    #[sqlx(rename = "FAILED")]
    Failed,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Received => "RECEIVED",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::PartialFail => "PARTIAL_FAIL",
            BatchStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Chunk lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum ChunkStatus {
    #[serde(rename = "PENDING")]
    #[sqlx(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING")]
    #[sqlx(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    #[sqlx(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    #[sqlx(rename = "FAILED")]
    Failed,
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChunkStatus::Pending => "PENDING",
            ChunkStatus::Processing => "PROCESSING",
            ChunkStatus::Completed => "COMPLETED",
            ChunkStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// A pharmacy registered with the hub, the tenant boundary for all
/// catalog data. `registry_code` is the external identifier pharmacies
/// declare in their ERP payloads.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Pharmacy {
    pub id: Uuid,
    pub registry_code: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One durable catalog submission. Batches are never deleted; they double
/// as the ingestion audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Batch {
    pub id: Uuid,
    pub pharmacy_id: Uuid,
    pub load_type: LoadType,
    pub idempotency_key: String,
    pub payload_key: String,
    pub payload_checksum: String,
    pub items_total: i32,
    pub items_processed: i32,
    pub items_failed: i32,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fixed-size slice of a batch, the unit of parallel processing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chunk {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub chunk_index: i32,
    pub payload_key: String,
    pub items_count: i32,
    pub status: ChunkStatus,
    pub attempts: i32,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reconciled catalog record row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub pharmacy_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub ean: Option<String>,
    pub price: f64,
    pub promo_price: f64,
    pub wholesale_price: f64,
    pub wholesale_min: i32,
    pub stock: f64,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub last_batch_id: Option<Uuid>,
    pub raw_payload: serde_json::Value,
    pub is_active: bool,
    pub last_seen_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One catalog record as pushed by the pharmacy ERP.
///
/// Every record declares its owning pharmacy; intake rejects payloads
/// mixing registry codes. The whole record is also persisted verbatim as
/// the product row's `raw_payload` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    pub registry_code: String,
    pub product_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ean: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub promo_price: f64,
    #[serde(default)]
    pub wholesale_price: f64,
    #[serde(default)]
    pub wholesale_min: i32,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Published on the batch-received topic after intake persists a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReceived {
    pub batch_id: Uuid,
    pub pharmacy_id: Uuid,
    pub registry_code: String,
    pub load_type: LoadType,
    pub occurred_at: DateTime<Utc>,
}

/// Published on the chunk-ready topic, one event per persisted chunk.
///
/// Carries `total_chunks` so workers can detect batch completion without
/// a separate count query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReady {
    pub chunk_id: Uuid,
    pub batch_id: Uuid,
    pub pharmacy_id: Uuid,
    pub registry_code: String,
    pub load_type: LoadType,
    pub payload_key: String,
    pub items_count: i32,
    pub chunk_index: i32,
    pub total_chunks: i32,
}

/// What intake returns to the submitting ERP, identical for fresh and
/// duplicate submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_type_roundtrip() {
        assert_eq!("full".parse::<LoadType>().unwrap(), LoadType::Full);
        assert_eq!("DELTA".parse::<LoadType>().unwrap(), LoadType::Delta);
        assert!("snapshot".parse::<LoadType>().is_err());
        assert_eq!(LoadType::Full.to_string(), "full");
    }

    #[test]
    fn test_status_serde_uses_storage_spelling() {
        assert_eq!(
            serde_json::to_string(&BatchStatus::PartialFail).unwrap(),
            "\"PARTIAL_FAIL\""
        );
        assert_eq!(
            serde_json::to_string(&ChunkStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        let status: BatchStatus = serde_json::from_str("\"RECEIVED\"").unwrap();
        assert_eq!(status, BatchStatus::Received);
    }

    #[test]
    fn test_catalog_record_defaults_for_missing_fields() {
        let record: CatalogRecord = serde_json::from_str(
            r#"{"registryCode": "12345678", "productId": "SKU-1", "title": "Aspirin 500mg"}"#,
        )
        .unwrap();
        assert_eq!(record.price, 0.0);
        assert_eq!(record.quantity, 0.0);
        assert_eq!(record.wholesale_min, 0);
        assert!(record.brand.is_none());
    }

    #[test]
    fn test_chunk_ready_event_roundtrip() {
        let event = ChunkReady {
            chunk_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            pharmacy_id: Uuid::new_v4(),
            registry_code: "98765".to_string(),
            load_type: LoadType::Full,
            payload_key: "chunks/98765/abc/0.json".to_string(),
            items_count: 1000,
            chunk_index: 0,
            total_chunks: 3,
        };
        let bytes = serde_json::to_vec(&event).unwrap();
        let parsed: ChunkReady = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.chunk_id, event.chunk_id);
        assert_eq!(parsed.total_chunks, 3);
        assert_eq!(parsed.load_type, LoadType::Full);
    }
}
