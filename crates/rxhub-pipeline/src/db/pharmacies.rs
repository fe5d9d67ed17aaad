//! Pharmacy repository

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Pharmacy;

/// Resolve the pharmacy a payload belongs to by its external registry code.
pub async fn find_by_registry_code(
    pool: &PgPool,
    registry_code: &str,
) -> Result<Option<Pharmacy>, sqlx::Error> {
    sqlx::query_as::<_, Pharmacy>(
        r#"
        SELECT id, registry_code, name, is_active, created_at, updated_at
        FROM pharmacies
        WHERE registry_code = $1
        "#,
    )
    .bind(registry_code)
    .fetch_optional(pool)
    .await
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Pharmacy>, sqlx::Error> {
    sqlx::query_as::<_, Pharmacy>(
        r#"
        SELECT id, registry_code, name, is_active, created_at, updated_at
        FROM pharmacies
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Register a pharmacy, or return the existing row for its registry code.
pub async fn register(
    pool: &PgPool,
    registry_code: &str,
    name: &str,
) -> Result<Pharmacy, sqlx::Error> {
    sqlx::query_as::<_, Pharmacy>(
        r#"
        INSERT INTO pharmacies (registry_code, name)
        VALUES ($1, $2)
        ON CONFLICT (registry_code)
        DO UPDATE SET updated_at = NOW()
        RETURNING id, registry_code, name, is_active, created_at, updated_at
        "#,
    )
    .bind(registry_code)
    .bind(name)
    .fetch_one(pool)
    .await
}
