//! Product repository: the bulk upsert and the full-load soft delete.

use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use crate::models::{CatalogRecord, Product};

const PRODUCT_COLUMNS: &str = "id, pharmacy_id, external_id, title, description, ean, price, \
     promo_price, wholesale_price, wholesale_min, stock, brand, category, image_url, \
     last_batch_id, raw_payload, is_active, last_seen_at, deleted_at, created_at, updated_at";

/// Bulk upsert a chunk's records, keyed by (pharmacy, external product id).
///
/// New records insert; existing records only rewrite when a price- or
/// stock-bearing field differs, or when this batch has not yet claimed the
/// row (`last_batch_id` differs). The suppression keeps unchanged rows out
/// of audit/trigger consumers while the `last_batch_id` arm guarantees
/// every record present in a full load survives reconciliation. Applying
/// the same chunk twice is a no-op the second time.
pub async fn bulk_upsert(
    pool: &PgPool,
    pharmacy_id: Uuid,
    batch_id: Uuid,
    records: &[CatalogRecord],
) -> Result<u64, sqlx::Error> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut builder = QueryBuilder::new(
        "INSERT INTO products (pharmacy_id, external_id, title, description, ean, price, \
         promo_price, wholesale_price, wholesale_min, stock, brand, category, image_url, \
         last_batch_id, raw_payload, is_active, last_seen_at, updated_at) ",
    );

    builder.push_values(records, |mut row, record| {
        let raw = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
        row.push_bind(pharmacy_id)
            .push_bind(&record.product_id)
            .push_bind(&record.title)
            .push_bind(&record.description)
            .push_bind(&record.ean)
            .push_bind(record.price)
            .push_bind(record.promo_price)
            .push_bind(record.wholesale_price)
            .push_bind(record.wholesale_min)
            .push_bind(record.quantity)
            .push_bind(&record.brand)
            .push_bind(&record.category)
            .push_bind(&record.image_url)
            .push_bind(batch_id)
            .push_bind(raw)
            .push("TRUE")
            .push("NOW()")
            .push("NOW()");
    });

    builder.push(
        r#"
        ON CONFLICT (pharmacy_id, external_id)
        DO UPDATE SET
            title = EXCLUDED.title,
            description = EXCLUDED.description,
            ean = EXCLUDED.ean,
            price = EXCLUDED.price,
            promo_price = EXCLUDED.promo_price,
            wholesale_price = EXCLUDED.wholesale_price,
            wholesale_min = EXCLUDED.wholesale_min,
            stock = EXCLUDED.stock,
            brand = EXCLUDED.brand,
            category = EXCLUDED.category,
            image_url = EXCLUDED.image_url,
            last_batch_id = EXCLUDED.last_batch_id,
            raw_payload = EXCLUDED.raw_payload,
            is_active = TRUE,
            deleted_at = NULL,
            last_seen_at = NOW(),
            updated_at = NOW()
        WHERE products.price IS DISTINCT FROM EXCLUDED.price
           OR products.stock IS DISTINCT FROM EXCLUDED.stock
           OR products.promo_price IS DISTINCT FROM EXCLUDED.promo_price
           OR products.wholesale_price IS DISTINCT FROM EXCLUDED.wholesale_price
           OR products.last_batch_id IS DISTINCT FROM EXCLUDED.last_batch_id
        "#,
    );

    builder.build().execute(pool).await?;

    Ok(records.len() as u64)
}

/// Soft-delete every active product of the pharmacy not reasserted by the
/// given full-load batch. The predicate reads current state only, so
/// re-running it for the same batch changes nothing.
pub async fn mark_unreferenced_inactive(
    pool: &PgPool,
    pharmacy_id: Uuid,
    batch_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE products
        SET is_active = FALSE, deleted_at = NOW(), updated_at = NOW()
        WHERE pharmacy_id = $1
          AND is_active = TRUE
          AND (last_batch_id IS NULL OR last_batch_id <> $2)
        "#,
    )
    .bind(pharmacy_id)
    .bind(batch_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn find(
    pool: &PgPool,
    pharmacy_id: Uuid,
    external_id: &str,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE pharmacy_id = $1 AND external_id = $2"
    ))
    .bind(pharmacy_id)
    .bind(external_id)
    .fetch_optional(pool)
    .await
}

pub async fn count_active(pool: &PgPool, pharmacy_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM products WHERE pharmacy_id = $1 AND is_active = TRUE",
    )
    .bind(pharmacy_id)
    .fetch_one(pool)
    .await
}
