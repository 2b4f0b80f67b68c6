//! In-memory implementation of [`SceneBackend`] and [`TerrainBackend`].
//!
//! [`MemoryStore`] keeps rows in ordered maps with the same keys and
//! replace semantics as the `PostgreSQL` tables, and records every executed
//! statement so callers can assert on how many writes reached the store.
//! It can be switched into an unavailable mode in which every call fails.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use strata_types::{
    GroupHeader, GroupId, InventoryItem, ItemId, ObjectPart, PartId, RegionId, TerrainPatch,
};
use uuid::Uuid;

use crate::backend::{SceneBackend, TerrainBackend};
use crate::error::DbError;
use crate::rows::{GroupRow, ItemRow, PartRow, PatchRow};

/// The kind of statement recorded in the [`MemoryStore`] log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// [`SceneBackend::upsert_groups`].
    UpsertGroups,
    /// [`SceneBackend::upsert_parts`].
    UpsertParts,
    /// [`SceneBackend::upsert_items`].
    UpsertItems,
    /// [`SceneBackend::delete_groups`].
    DeleteGroups,
    /// [`SceneBackend::delete_parts`].
    DeleteParts,
    /// [`SceneBackend::delete_items`].
    DeleteItems,
    /// [`TerrainBackend::upsert_patches`].
    UpsertPatches,
    /// [`TerrainBackend::snapshot_default`].
    SnapshotDefault,
}

/// One executed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement {
    /// What was executed.
    pub kind: StatementKind,
    /// Rows or identities passed to the statement.
    pub rows: usize,
}

#[derive(Debug, Default)]
struct Tables {
    groups: BTreeMap<Uuid, GroupRow>,
    parts: BTreeMap<Uuid, PartRow>,
    items: BTreeMap<Uuid, ItemRow>,
    patches: BTreeMap<(Uuid, i32), PatchRow>,
    defaults: BTreeMap<(Uuid, i32), PatchRow>,
    log: Vec<Statement>,
}

impl Tables {
    fn record(&mut self, kind: StatementKind, rows: usize) {
        self.log.push(Statement { kind, rows });
    }
}

/// A store that lives entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (`true`) or succeed again (`false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(DbError::Unavailable(String::from(
                "memory store switched off",
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw row access
    // -----------------------------------------------------------------------

    /// Insert a group row as-is, bypassing the statement log.
    pub fn insert_group_row(&self, row: GroupRow) {
        self.tables().groups.insert(row.id, row);
    }

    /// Insert a part row as-is, bypassing the statement log.
    pub fn insert_part_row(&self, row: PartRow) {
        self.tables().parts.insert(row.id, row);
    }

    /// Insert an inventory row as-is, bypassing the statement log.
    pub fn insert_item_row(&self, row: ItemRow) {
        self.tables().items.insert(row.id, row);
    }

    /// Insert a live patch row as-is, bypassing the statement log.
    pub fn insert_patch_row(&self, row: PatchRow) {
        self.tables()
            .patches
            .insert((row.region_id, row.patch_index), row);
    }

    /// All group rows.
    pub fn group_rows(&self) -> Vec<GroupRow> {
        self.tables().groups.values().cloned().collect()
    }

    /// All part rows.
    pub fn part_rows(&self) -> Vec<PartRow> {
        self.tables().parts.values().cloned().collect()
    }

    /// All inventory rows.
    pub fn item_rows(&self) -> Vec<ItemRow> {
        self.tables().items.values().cloned().collect()
    }

    /// All live patch rows.
    pub fn patch_rows(&self) -> Vec<PatchRow> {
        self.tables().patches.values().cloned().collect()
    }

    /// All default patch rows.
    pub fn default_patch_rows(&self) -> Vec<PatchRow> {
        self.tables().defaults.values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Statement log
    // -----------------------------------------------------------------------

    /// Every statement executed so far, oldest first.
    pub fn statements(&self) -> Vec<Statement> {
        self.tables().log.clone()
    }

    /// Number of executed statements of `kind`.
    pub fn statement_count(&self, kind: StatementKind) -> usize {
        self.tables()
            .log
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Total rows passed to statements of `kind`.
    pub fn rows_written(&self, kind: StatementKind) -> usize {
        self.tables()
            .log
            .iter()
            .filter(|s| s.kind == kind)
            .fold(0_usize, |acc, s| acc.saturating_add(s.rows))
    }

    /// Forget the statement log, keeping the rows.
    pub fn clear_statements(&self) {
        self.tables().log.clear();
    }
}

fn cascade_parts(tables: &mut Tables, parts: &[Uuid]) {
    tables.items.retain(|_, item| !parts.contains(&item.part_id));
    for id in parts {
        tables.parts.remove(id);
    }
}

#[async_trait]
impl SceneBackend for MemoryStore {
    async fn upsert_groups(&self, groups: &[GroupHeader]) -> Result<(), DbError> {
        self.check()?;
        let rows = groups
            .iter()
            .map(GroupRow::from_header)
            .collect::<Result<Vec<_>, _>>()?;
        let mut tables = self.tables();
        for row in rows {
            tables.groups.insert(row.id, row);
        }
        tables.record(StatementKind::UpsertGroups, groups.len());
        Ok(())
    }

    async fn upsert_parts(&self, region: RegionId, parts: &[ObjectPart]) -> Result<(), DbError> {
        self.check()?;
        let rows = parts
            .iter()
            .map(|part| PartRow::from_part(region, part))
            .collect::<Result<Vec<_>, _>>()?;
        let mut tables = self.tables();
        for row in rows {
            tables.parts.insert(row.id, row);
        }
        tables.record(StatementKind::UpsertParts, parts.len());
        Ok(())
    }

    async fn upsert_items(
        &self,
        region: RegionId,
        items: &[InventoryItem],
    ) -> Result<(), DbError> {
        self.check()?;
        let rows = items
            .iter()
            .map(|item| ItemRow::from_item(region, item))
            .collect::<Result<Vec<_>, _>>()?;
        let mut tables = self.tables();
        for row in rows {
            tables.items.insert(row.id, row);
        }
        tables.record(StatementKind::UpsertItems, items.len());
        Ok(())
    }

    async fn delete_groups(&self, groups: &[GroupId]) -> Result<(), DbError> {
        self.check()?;
        let ids: Vec<Uuid> = groups.iter().map(|id| id.into_inner()).collect();
        let mut tables = self.tables();
        let parts: Vec<Uuid> = tables
            .parts
            .values()
            .filter(|part| ids.contains(&part.group_id))
            .map(|part| part.id)
            .collect();
        cascade_parts(&mut tables, &parts);
        for id in &ids {
            tables.groups.remove(id);
        }
        tables.record(StatementKind::DeleteGroups, ids.len());
        Ok(())
    }

    async fn delete_parts(&self, parts: &[PartId]) -> Result<(), DbError> {
        self.check()?;
        let ids: Vec<Uuid> = parts.iter().map(|id| id.into_inner()).collect();
        let mut tables = self.tables();
        cascade_parts(&mut tables, &ids);
        tables.record(StatementKind::DeleteParts, ids.len());
        Ok(())
    }

    async fn delete_items(&self, items: &[ItemId]) -> Result<(), DbError> {
        self.check()?;
        let mut tables = self.tables();
        for id in items {
            tables.items.remove(&id.into_inner());
        }
        tables.record(StatementKind::DeleteItems, items.len());
        Ok(())
    }

    async fn load_groups(&self, region: RegionId) -> Result<Vec<GroupRow>, DbError> {
        self.check()?;
        let region = region.into_inner();
        Ok(self
            .tables()
            .groups
            .values()
            .filter(|row| row.region_id == region)
            .cloned()
            .collect())
    }

    async fn load_parts(&self, region: RegionId) -> Result<Vec<PartRow>, DbError> {
        self.check()?;
        let region = region.into_inner();
        Ok(self
            .tables()
            .parts
            .values()
            .filter(|row| row.region_id == region)
            .cloned()
            .collect())
    }

    async fn load_items(&self, region: RegionId) -> Result<Vec<ItemRow>, DbError> {
        self.check()?;
        let region = region.into_inner();
        Ok(self
            .tables()
            .items
            .values()
            .filter(|row| row.region_id == region)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TerrainBackend for MemoryStore {
    async fn upsert_patches(&self, patches: &[TerrainPatch]) -> Result<(), DbError> {
        self.check()?;
        let rows = patches
            .iter()
            .map(PatchRow::from_patch)
            .collect::<Result<Vec<_>, _>>()?;
        let mut tables = self.tables();
        for row in rows {
            tables.patches.insert((row.region_id, row.patch_index), row);
        }
        tables.record(StatementKind::UpsertPatches, patches.len());
        Ok(())
    }

    async fn snapshot_default(&self, region: RegionId) -> Result<u64, DbError> {
        self.check()?;
        let region = region.into_inner();
        let mut tables = self.tables();
        let live: Vec<PatchRow> = tables
            .patches
            .values()
            .filter(|row| row.region_id == region)
            .cloned()
            .collect();
        let copied = live.len();
        for row in live {
            tables.defaults.insert((row.region_id, row.patch_index), row);
        }
        tables.record(StatementKind::SnapshotDefault, copied);
        Ok(u64::try_from(copied).unwrap_or(u64::MAX))
    }

    async fn load_patches(&self, region: RegionId) -> Result<Vec<PatchRow>, DbError> {
        self.check()?;
        let region = region.into_inner();
        Ok(self
            .tables()
            .patches
            .values()
            .filter(|row| row.region_id == region)
            .cloned()
            .collect())
    }

    async fn load_default_patches(&self, region: RegionId) -> Result<Vec<PatchRow>, DbError> {
        self.check()?;
        let region = region.into_inner();
        Ok(self
            .tables()
            .defaults
            .values()
            .filter(|row| row.region_id == region)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use strata_types::{
        AgentId, AssetId, GroupAttributes, Inventory, PartAppearance, PatchIndex, Permissions,
        ROOT_LINK_NUMBER, Transform,
    };

    use super::*;

    fn header(region: RegionId, root: PartId) -> GroupHeader {
        GroupHeader {
            id: GroupId::new(),
            region_id: region,
            name: String::from("lamp"),
            owner_id: AgentId::new(),
            root_part_id: root,
            attributes: GroupAttributes::default(),
        }
    }

    fn part(id: PartId, group_id: GroupId, link_number: i32) -> ObjectPart {
        ObjectPart {
            id,
            group_id,
            link_number,
            name: String::from("shade"),
            owner_id: AgentId::new(),
            creator_id: AgentId::new(),
            transform: Transform::default(),
            appearance: PartAppearance::default(),
            serial: 1,
            inventory: Inventory::default(),
            created_at: Utc::now(),
        }
    }

    fn item(part_id: PartId) -> InventoryItem {
        InventoryItem {
            id: ItemId::new(),
            part_id,
            asset_id: AssetId::new(),
            name: String::from("notecard"),
            description: String::new(),
            asset_type: 7,
            permissions: Permissions::default(),
            inventory_serial: 1,
        }
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_row() {
        let store = MemoryStore::new();
        let region = RegionId::new();
        let root = PartId::new();
        let header = header(region, root);
        let parts = vec![part(root, header.id, ROOT_LINK_NUMBER)];

        store.upsert_parts(region, &parts).await.unwrap();
        let after_first = store.part_rows();
        store.upsert_parts(region, &parts).await.unwrap();

        assert_eq!(store.part_rows(), after_first);
        assert_eq!(store.statement_count(StatementKind::UpsertParts), 2);
    }

    #[tokio::test]
    async fn delete_group_cascades_to_parts_and_items() {
        let store = MemoryStore::new();
        let region = RegionId::new();
        let root = PartId::new();
        let header = header(region, root);
        let child = PartId::new();
        let parts = vec![
            part(root, header.id, ROOT_LINK_NUMBER),
            part(child, header.id, 2),
        ];
        let items = vec![item(root), item(child)];

        store.upsert_groups(&[header.clone()]).await.unwrap();
        store.upsert_parts(region, &parts).await.unwrap();
        store.upsert_items(region, &items).await.unwrap();

        store.delete_groups(&[header.id]).await.unwrap();

        assert!(store.group_rows().is_empty());
        assert!(store.part_rows().is_empty());
        assert!(store.item_rows().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_rejects_calls() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let result = store.load_groups(RegionId::new()).await;
        assert!(matches!(result, Err(DbError::Unavailable(_))));

        store.set_unavailable(false);
        assert!(store.load_groups(RegionId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn oversized_patch_indexes_do_not_share_a_row() {
        let store = MemoryStore::new();
        let region = RegionId::new();
        let patch = |index: u32| TerrainPatch {
            region_id: region,
            index: PatchIndex(index),
            serial: 1,
            payload: vec![u8::try_from(index % 256).unwrap()],
        };

        let result = store
            .upsert_patches(&[patch(1), patch(u32::MAX - 1), patch(u32::MAX)])
            .await;

        assert!(matches!(result, Err(DbError::OutOfRange { .. })));
        assert!(store.patch_rows().is_empty());
        assert!(store.statements().is_empty());
    }

    #[tokio::test]
    async fn snapshot_copies_only_the_region() {
        let store = MemoryStore::new();
        let region = RegionId::new();
        let other = RegionId::new();
        let patches = vec![
            TerrainPatch {
                region_id: region,
                index: PatchIndex(0),
                serial: 1,
                payload: vec![1, 2, 3],
            },
            TerrainPatch {
                region_id: other,
                index: PatchIndex(0),
                serial: 1,
                payload: vec![4],
            },
        ];
        store.upsert_patches(&patches).await.unwrap();

        let copied = store.snapshot_default(region).await.unwrap();

        assert_eq!(copied, 1);
        let defaults = store.default_patch_rows();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults.first().map(|r| r.payload.clone()), Some(vec![1, 2, 3]));
        assert_eq!(store.patch_rows().len(), 2);
    }
}
