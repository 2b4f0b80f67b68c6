//! Store interfaces consumed by the persistence workers and loaders.
//!
//! The workers never talk to `PostgreSQL` directly. They hold an
//! `Arc<dyn SceneBackend>` / `Arc<dyn TerrainBackend>` and each call is
//! one scoped unit of work: the implementation acquires a connection,
//! executes, and releases it before returning.
//!
//! Upserts have replace semantics: applying the same batch twice leaves the
//! same rows as applying it once.

use async_trait::async_trait;
use strata_types::{
    GroupHeader, GroupId, InventoryItem, ItemId, ObjectPart, PartId, RegionId, TerrainPatch,
};

use crate::error::DbError;
use crate::rows::{GroupRow, ItemRow, PartRow, PatchRow};

/// Batch access to the object group, part, and inventory tables.
#[async_trait]
pub trait SceneBackend: Send + Sync {
    /// Insert or replace group rows.
    async fn upsert_groups(&self, groups: &[GroupHeader]) -> Result<(), DbError>;

    /// Insert or replace part rows. Part inventories are not written.
    async fn upsert_parts(&self, region: RegionId, parts: &[ObjectPart]) -> Result<(), DbError>;

    /// Insert or replace inventory item rows.
    async fn upsert_items(&self, region: RegionId, items: &[InventoryItem])
    -> Result<(), DbError>;

    /// Delete groups together with all their parts and those parts'
    /// inventory rows.
    async fn delete_groups(&self, groups: &[GroupId]) -> Result<(), DbError>;

    /// Delete parts together with their inventory rows.
    async fn delete_parts(&self, parts: &[PartId]) -> Result<(), DbError>;

    /// Delete individual inventory rows.
    async fn delete_items(&self, items: &[ItemId]) -> Result<(), DbError>;

    /// Read every group row of a region.
    async fn load_groups(&self, region: RegionId) -> Result<Vec<GroupRow>, DbError>;

    /// Read every part row of a region.
    async fn load_parts(&self, region: RegionId) -> Result<Vec<PartRow>, DbError>;

    /// Read every inventory row of a region.
    async fn load_items(&self, region: RegionId) -> Result<Vec<ItemRow>, DbError>;
}

/// Batch access to the live and default terrain tables.
#[async_trait]
pub trait TerrainBackend: Send + Sync {
    /// Insert or replace live patch rows.
    async fn upsert_patches(&self, patches: &[TerrainPatch]) -> Result<(), DbError>;

    /// Copy every live patch of `region` into its default terrain in a
    /// single statement. Returns the number of patches copied.
    async fn snapshot_default(&self, region: RegionId) -> Result<u64, DbError>;

    /// Read every live patch row of a region.
    async fn load_patches(&self, region: RegionId) -> Result<Vec<PatchRow>, DbError>;

    /// Read every default patch row of a region.
    async fn load_default_patches(&self, region: RegionId) -> Result<Vec<PatchRow>, DbError>;
}
