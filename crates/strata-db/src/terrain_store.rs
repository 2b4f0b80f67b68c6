//! `PostgreSQL` implementation of [`TerrainBackend`].
//!
//! Live patches live in `terrain_patches`; the region's default terrain
//! (the reset point) lives in `terrain_defaults` with the same shape.

use async_trait::async_trait;
use sqlx::PgPool;
use strata_types::{RegionId, TerrainPatch};

use crate::backend::TerrainBackend;
use crate::error::DbError;
use crate::rows::PatchRow;

/// Operations on the `terrain_patches` and `terrain_defaults` tables.
#[derive(Clone)]
pub struct TerrainStore {
    pool: PgPool,
}

impl TerrainStore {
    /// Create a terrain store on a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TerrainBackend for TerrainStore {
    async fn upsert_patches(&self, patches: &[TerrainPatch]) -> Result<(), DbError> {
        if patches.is_empty() {
            return Ok(());
        }

        let len = patches.len();
        let mut region_ids = Vec::with_capacity(len);
        let mut indices = Vec::with_capacity(len);
        let mut serials = Vec::with_capacity(len);
        let mut payloads = Vec::with_capacity(len);
        for patch in patches {
            let row = PatchRow::from_patch(patch)?;
            region_ids.push(row.region_id);
            indices.push(row.patch_index);
            serials.push(row.serial);
            payloads.push(row.payload);
        }

        sqlx::query(
            r"INSERT INTO terrain_patches (region_id, patch_index, serial, payload)
              SELECT * FROM UNNEST($1::UUID[], $2::INT[], $3::BIGINT[], $4::BYTEA[])
              ON CONFLICT (region_id, patch_index) DO UPDATE SET
                serial = EXCLUDED.serial,
                payload = EXCLUDED.payload,
                updated_at = now()",
        )
        .bind(&region_ids)
        .bind(&indices)
        .bind(&serials)
        .bind(&payloads)
        .execute(&self.pool)
        .await?;

        tracing::debug!(count = len, "Upserted terrain patches (batch UNNEST)");
        Ok(())
    }

    async fn snapshot_default(&self, region: RegionId) -> Result<u64, DbError> {
        let result = sqlx::query(
            r"INSERT INTO terrain_defaults (region_id, patch_index, serial, payload)
              SELECT region_id, patch_index, serial, payload
              FROM terrain_patches
              WHERE region_id = $1
              ON CONFLICT (region_id, patch_index) DO UPDATE SET
                serial = EXCLUDED.serial,
                payload = EXCLUDED.payload,
                captured_at = now()",
        )
        .bind(region.into_inner())
        .execute(&self.pool)
        .await?;

        let copied = result.rows_affected();
        tracing::debug!(%region, copied, "Copied live terrain into default terrain");
        Ok(copied)
    }

    async fn load_patches(&self, region: RegionId) -> Result<Vec<PatchRow>, DbError> {
        let rows = sqlx::query_as::<_, PatchRow>(
            r"SELECT region_id, patch_index, serial, payload
              FROM terrain_patches
              WHERE region_id = $1
              ORDER BY patch_index",
        )
        .bind(region.into_inner())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn load_default_patches(&self, region: RegionId) -> Result<Vec<PatchRow>, DbError> {
        let rows = sqlx::query_as::<_, PatchRow>(
            r"SELECT region_id, patch_index, serial, payload
              FROM terrain_defaults
              WHERE region_id = $1
              ORDER BY patch_index",
        )
        .bind(region.into_inner())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
