//! `PostgreSQL` implementation of [`SceneBackend`].
//!
//! Upserts use `UNNEST` over per-column arrays so a whole batch is one
//! statement per chunk, with `ON CONFLICT (id) DO UPDATE` giving replace
//! semantics. Deletes bind the identity list as a single `UUID[]`
//! parameter. Cascading deletes run inside one transaction.

use async_trait::async_trait;
use sqlx::PgPool;
use strata_types::{GroupHeader, GroupId, InventoryItem, ItemId, ObjectPart, PartId, RegionId};
use uuid::Uuid;

use crate::backend::SceneBackend;
use crate::error::DbError;
use crate::rows::{GroupRow, ItemRow, PartRow};

/// Default number of rows per `UNNEST` statement.
const DEFAULT_BATCH_SIZE: usize = 500;

/// Operations on the `object_groups`, `object_parts`, and
/// `part_inventory_items` tables.
#[derive(Clone)]
pub struct SceneStore {
    pool: PgPool,
    batch_size: usize,
}

impl SceneStore {
    /// Create a scene store on a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the number of rows written per statement.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    fn chunk_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

#[async_trait]
impl SceneBackend for SceneStore {
    async fn upsert_groups(&self, groups: &[GroupHeader]) -> Result<(), DbError> {
        if groups.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in groups.chunks(self.chunk_size()) {
            let len = chunk.len();
            let mut ids = Vec::with_capacity(len);
            let mut region_ids = Vec::with_capacity(len);
            let mut names = Vec::with_capacity(len);
            let mut owner_ids = Vec::with_capacity(len);
            let mut root_part_ids = Vec::with_capacity(len);
            let mut attributes = Vec::with_capacity(len);

            for header in chunk {
                let row = GroupRow::from_header(header)?;
                ids.push(row.id);
                region_ids.push(row.region_id);
                names.push(row.name);
                owner_ids.push(row.owner_id);
                root_part_ids.push(row.root_part_id);
                attributes.push(row.attributes);
            }

            sqlx::query(
                r"INSERT INTO object_groups (id, region_id, name, owner_id, root_part_id, attributes)
                  SELECT * FROM UNNEST($1::UUID[], $2::UUID[], $3::TEXT[], $4::UUID[], $5::UUID[], $6::JSONB[])
                  ON CONFLICT (id) DO UPDATE SET
                    region_id = EXCLUDED.region_id,
                    name = EXCLUDED.name,
                    owner_id = EXCLUDED.owner_id,
                    root_part_id = EXCLUDED.root_part_id,
                    attributes = EXCLUDED.attributes,
                    updated_at = now()",
            )
            .bind(&ids)
            .bind(&region_ids)
            .bind(&names)
            .bind(&owner_ids)
            .bind(&root_part_ids)
            .bind(&attributes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(count = groups.len(), "Upserted object groups (batch UNNEST)");
        Ok(())
    }

    async fn upsert_parts(&self, region: RegionId, parts: &[ObjectPart]) -> Result<(), DbError> {
        if parts.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in parts.chunks(self.chunk_size()) {
            let len = chunk.len();
            let mut ids = Vec::with_capacity(len);
            let mut group_ids = Vec::with_capacity(len);
            let mut region_ids = Vec::with_capacity(len);
            let mut link_numbers = Vec::with_capacity(len);
            let mut names = Vec::with_capacity(len);
            let mut owner_ids = Vec::with_capacity(len);
            let mut creator_ids = Vec::with_capacity(len);
            let mut transforms = Vec::with_capacity(len);
            let mut shapes = Vec::with_capacity(len);
            let mut texture_entries = Vec::with_capacity(len);
            let mut extra_params = Vec::with_capacity(len);
            let mut particle_systems = Vec::with_capacity(len);
            let mut serials = Vec::with_capacity(len);
            let mut created_ats = Vec::with_capacity(len);

            for part in chunk {
                let row = PartRow::from_part(region, part)?;
                ids.push(row.id);
                group_ids.push(row.group_id);
                region_ids.push(row.region_id);
                link_numbers.push(row.link_number);
                names.push(row.name);
                owner_ids.push(row.owner_id);
                creator_ids.push(row.creator_id);
                transforms.push(row.transform);
                shapes.push(row.shape);
                texture_entries.push(row.texture_entry);
                extra_params.push(row.extra_params);
                particle_systems.push(row.particle_system);
                serials.push(row.serial);
                created_ats.push(row.created_at);
            }

            sqlx::query(
                r"INSERT INTO object_parts
                    (id, group_id, region_id, link_number, name, owner_id, creator_id, transform,
                     shape, texture_entry, extra_params, particle_system, serial, created_at)
                  SELECT * FROM UNNEST(
                    $1::UUID[], $2::UUID[], $3::UUID[], $4::INT[], $5::TEXT[], $6::UUID[], $7::UUID[],
                    $8::JSONB[], $9::BYTEA[], $10::BYTEA[], $11::BYTEA[], $12::BYTEA[], $13::BIGINT[],
                    $14::TIMESTAMPTZ[])
                  ON CONFLICT (id) DO UPDATE SET
                    group_id = EXCLUDED.group_id,
                    region_id = EXCLUDED.region_id,
                    link_number = EXCLUDED.link_number,
                    name = EXCLUDED.name,
                    owner_id = EXCLUDED.owner_id,
                    creator_id = EXCLUDED.creator_id,
                    transform = EXCLUDED.transform,
                    shape = EXCLUDED.shape,
                    texture_entry = EXCLUDED.texture_entry,
                    extra_params = EXCLUDED.extra_params,
                    particle_system = EXCLUDED.particle_system,
                    serial = EXCLUDED.serial,
                    updated_at = now()",
            )
            .bind(&ids)
            .bind(&group_ids)
            .bind(&region_ids)
            .bind(&link_numbers)
            .bind(&names)
            .bind(&owner_ids)
            .bind(&creator_ids)
            .bind(&transforms)
            .bind(&shapes)
            .bind(&texture_entries)
            .bind(&extra_params)
            .bind(&particle_systems)
            .bind(&serials)
            .bind(&created_ats)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(%region, count = parts.len(), "Upserted object parts (batch UNNEST)");
        Ok(())
    }

    async fn upsert_items(
        &self,
        region: RegionId,
        items: &[InventoryItem],
    ) -> Result<(), DbError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in items.chunks(self.chunk_size()) {
            let len = chunk.len();
            let mut ids = Vec::with_capacity(len);
            let mut part_ids = Vec::with_capacity(len);
            let mut region_ids = Vec::with_capacity(len);
            let mut asset_ids = Vec::with_capacity(len);
            let mut names = Vec::with_capacity(len);
            let mut descriptions = Vec::with_capacity(len);
            let mut asset_types = Vec::with_capacity(len);
            let mut permissions = Vec::with_capacity(len);
            let mut serials = Vec::with_capacity(len);

            for item in chunk {
                let row = ItemRow::from_item(region, item)?;
                ids.push(row.id);
                part_ids.push(row.part_id);
                region_ids.push(row.region_id);
                asset_ids.push(row.asset_id);
                names.push(row.name);
                descriptions.push(row.description);
                asset_types.push(row.asset_type);
                permissions.push(row.permissions);
                serials.push(row.inventory_serial);
            }

            sqlx::query(
                r"INSERT INTO part_inventory_items
                    (id, part_id, region_id, asset_id, name, description, asset_type, permissions, inventory_serial)
                  SELECT * FROM UNNEST($1::UUID[], $2::UUID[], $3::UUID[], $4::UUID[], $5::TEXT[], $6::TEXT[],
                                       $7::INT[], $8::JSONB[], $9::BIGINT[])
                  ON CONFLICT (id) DO UPDATE SET
                    part_id = EXCLUDED.part_id,
                    region_id = EXCLUDED.region_id,
                    asset_id = EXCLUDED.asset_id,
                    name = EXCLUDED.name,
                    description = EXCLUDED.description,
                    asset_type = EXCLUDED.asset_type,
                    permissions = EXCLUDED.permissions,
                    inventory_serial = EXCLUDED.inventory_serial",
            )
            .bind(&ids)
            .bind(&part_ids)
            .bind(&region_ids)
            .bind(&asset_ids)
            .bind(&names)
            .bind(&descriptions)
            .bind(&asset_types)
            .bind(&permissions)
            .bind(&serials)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(%region, count = items.len(), "Upserted inventory items (batch UNNEST)");
        Ok(())
    }

    async fn delete_groups(&self, groups: &[GroupId]) -> Result<(), DbError> {
        if groups.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = groups.iter().map(|id| id.into_inner()).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"DELETE FROM part_inventory_items
              WHERE part_id IN (SELECT id FROM object_parts WHERE group_id = ANY($1))",
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;
        sqlx::query(r"DELETE FROM object_parts WHERE group_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r"DELETE FROM object_groups WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(count = ids.len(), "Deleted object groups with parts and inventory");
        Ok(())
    }

    async fn delete_parts(&self, parts: &[PartId]) -> Result<(), DbError> {
        if parts.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = parts.iter().map(|id| id.into_inner()).collect();

        let mut tx = self.pool.begin().await?;
        sqlx::query(r"DELETE FROM part_inventory_items WHERE part_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r"DELETE FROM object_parts WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(count = ids.len(), "Deleted object parts with inventory");
        Ok(())
    }

    async fn delete_items(&self, items: &[ItemId]) -> Result<(), DbError> {
        if items.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = items.iter().map(|id| id.into_inner()).collect();

        sqlx::query(r"DELETE FROM part_inventory_items WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await?;

        tracing::debug!(count = ids.len(), "Deleted inventory items");
        Ok(())
    }

    async fn load_groups(&self, region: RegionId) -> Result<Vec<GroupRow>, DbError> {
        let rows = sqlx::query_as::<_, GroupRow>(
            r"SELECT id, region_id, name, owner_id, root_part_id, attributes
              FROM object_groups
              WHERE region_id = $1",
        )
        .bind(region.into_inner())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn load_parts(&self, region: RegionId) -> Result<Vec<PartRow>, DbError> {
        let rows = sqlx::query_as::<_, PartRow>(
            r"SELECT id, group_id, region_id, link_number, name, owner_id, creator_id, transform,
                     shape, texture_entry, extra_params, particle_system, serial, created_at
              FROM object_parts
              WHERE region_id = $1
              ORDER BY group_id, link_number",
        )
        .bind(region.into_inner())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn load_items(&self, region: RegionId) -> Result<Vec<ItemRow>, DbError> {
        let rows = sqlx::query_as::<_, ItemRow>(
            r"SELECT id, part_id, region_id, asset_id, name, description, asset_type, permissions,
                     inventory_serial
              FROM part_inventory_items
              WHERE region_id = $1",
        )
        .bind(region.into_inner())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
