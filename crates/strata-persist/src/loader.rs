//! Region reconstruction from flat rows.
//!
//! [`GraphLoader::load`] bulk-reads a region's group, part, and inventory
//! rows and rebuilds the object graph:
//!
//! 1. Group rows are parsed into headers. Malformed rows are skipped.
//! 2. Part rows are attached to their group; parts whose group is unknown
//!    are orphans.
//! 3. Inventory rows are attached to their part; items whose part is
//!    unknown are orphans.
//! 4. Each group is finalized. A group that fails (no parts, no root,
//!    colliding link numbers) is discarded.
//! 5. Orphans and discarded groups are deleted from the store in chunks,
//!    best effort.
//!
//! A malformed row is never deleted, and neither is anything hanging off
//! it: parts of a malformed group row, items of a malformed part row, and
//! a group that fails to finalize while one of its part rows is malformed
//! all stay in the store unloaded and are counted as withheld.
//!
//! Only failures to read the store at all reach the caller. Everything
//! else is repaired and reported in the [`RepairSummary`].

use std::collections::{BTreeMap, BTreeSet};

use strata_db::{DbError, SceneBackend};
use strata_types::{GroupHeader, GroupId, ItemId, ObjectGroup, ObjectPart, PartId, RegionId};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors that abort a region load.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The store could not be read.
    #[error("failed to read region rows: {0}")]
    Store(#[from] DbError),
}

/// What a load found wrong and repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairSummary {
    /// Rows skipped because a column did not parse.
    pub malformed_rows: usize,
    /// Sound rows left in the store unloaded because a row they depend on
    /// is malformed.
    pub withheld_rows: usize,
    /// Parts deleted because their group does not exist.
    pub orphaned_parts: usize,
    /// Inventory items deleted because their part does not exist.
    pub orphaned_items: usize,
    /// Groups deleted because they could not be finalized.
    pub discarded_groups: usize,
    /// Repair statements that failed; the rows stay until the next load.
    pub failed_deletes: usize,
}

impl RepairSummary {
    /// Whether the region loaded without finding anything to repair.
    pub const fn is_clean(&self) -> bool {
        self.malformed_rows == 0
            && self.withheld_rows == 0
            && self.orphaned_parts == 0
            && self.orphaned_items == 0
            && self.discarded_groups == 0
    }
}

/// The result of a region load.
#[derive(Debug, Clone, Default)]
pub struct RegionLoad {
    /// Successfully finalized groups.
    pub groups: BTreeMap<GroupId, ObjectGroup>,
    /// Repairs made along the way.
    pub repairs: RepairSummary,
}

impl RegionLoad {
    /// Total parts across all loaded groups.
    pub fn part_count(&self) -> usize {
        self.groups
            .values()
            .fold(0_usize, |acc, g| acc.saturating_add(g.part_count()))
    }
}

/// Rebuilds a region's object graph from a [`SceneBackend`].
pub struct GraphLoader<'a> {
    store: &'a dyn SceneBackend,
    chunk_size: usize,
}

impl core::fmt::Debug for GraphLoader<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GraphLoader")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl<'a> GraphLoader<'a> {
    /// Create a loader that deletes at most `chunk_size` identities per
    /// repair statement.
    pub fn new(store: &'a dyn SceneBackend, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Reconstruct every group of `region`, repairing orphans.
    pub async fn load(&self, region: RegionId) -> Result<RegionLoad, LoadError> {
        let mut repairs = RepairSummary::default();

        let mut headers: BTreeMap<GroupId, GroupHeader> = BTreeMap::new();
        let mut malformed_groups: BTreeSet<Uuid> = BTreeSet::new();
        for row in self.store.load_groups(region).await? {
            let id = row.id;
            match row.into_header() {
                Ok(header) => {
                    headers.insert(header.id, header);
                }
                Err(e) => {
                    warn!(region = %region, group = %id, error = %e, "Skipping malformed group row");
                    repairs.malformed_rows = repairs.malformed_rows.saturating_add(1);
                    malformed_groups.insert(id);
                }
            }
        }

        let mut parts: BTreeMap<PartId, ObjectPart> = BTreeMap::new();
        let mut orphan_parts: Vec<PartId> = Vec::new();
        // Parts left alone: unparsed rows and children of unparsed groups.
        let mut held_parts: BTreeSet<Uuid> = BTreeSet::new();
        // Groups with an unparsed part row; never discarded.
        let mut tainted_groups: BTreeSet<Uuid> = BTreeSet::new();
        for row in self.store.load_parts(region).await? {
            let id = row.id;
            let group_id = row.group_id;
            match row.into_part() {
                Ok(part) if headers.contains_key(&part.group_id) => {
                    parts.insert(part.id, part);
                }
                Ok(part) if malformed_groups.contains(&group_id) => {
                    held_parts.insert(id);
                    repairs.withheld_rows = repairs.withheld_rows.saturating_add(1);
                    debug!(region = %region, part = %part.id, "Keeping part of malformed group");
                }
                Ok(part) => {
                    warn!(
                        region = %region,
                        part = %part.id,
                        group = %part.group_id,
                        "Orphaned part, group does not exist"
                    );
                    orphan_parts.push(part.id);
                }
                Err(e) => {
                    warn!(region = %region, part = %id, error = %e, "Skipping malformed part row");
                    repairs.malformed_rows = repairs.malformed_rows.saturating_add(1);
                    held_parts.insert(id);
                    tainted_groups.insert(group_id);
                }
            }
        }

        let mut orphan_items: Vec<ItemId> = Vec::new();
        for row in self.store.load_items(region).await? {
            let id = row.id;
            match row.into_item() {
                Ok(item) => match parts.get_mut(&item.part_id) {
                    Some(part) => {
                        part.inventory.serial = part.inventory.serial.max(item.inventory_serial);
                        part.inventory.insert(item);
                    }
                    None if held_parts.contains(&item.part_id.into_inner()) => {
                        repairs.withheld_rows = repairs.withheld_rows.saturating_add(1);
                    }
                    None => {
                        warn!(
                            region = %region,
                            item = %item.id,
                            part = %item.part_id,
                            "Orphaned inventory item, part does not exist"
                        );
                        orphan_items.push(item.id);
                    }
                },
                Err(e) => {
                    warn!(region = %region, item = %id, error = %e, "Skipping malformed inventory row");
                    repairs.malformed_rows = repairs.malformed_rows.saturating_add(1);
                }
            }
        }

        let mut members: BTreeMap<GroupId, Vec<ObjectPart>> = BTreeMap::new();
        for part in parts.into_values() {
            members.entry(part.group_id).or_default().push(part);
        }

        let mut groups = BTreeMap::new();
        let mut discarded: Vec<GroupId> = Vec::new();
        for (id, header) in headers {
            let group_parts = members.remove(&id).unwrap_or_default();
            let kept_rows = group_parts.iter().fold(1_usize, |acc, p| {
                acc.saturating_add(1).saturating_add(p.inventory.len())
            });
            match ObjectGroup::assemble(header, group_parts) {
                Ok(group) => {
                    groups.insert(id, group);
                }
                Err(e) if tainted_groups.contains(&id.into_inner()) => {
                    warn!(
                        region = %region,
                        group = %id,
                        error = %e,
                        "Group incomplete because a part row is malformed, leaving it stored"
                    );
                    repairs.withheld_rows = repairs.withheld_rows.saturating_add(kept_rows);
                }
                Err(e) => {
                    warn!(region = %region, group = %id, error = %e, "Discarding corrupt group");
                    discarded.push(id);
                }
            }
        }

        repairs.orphaned_parts = orphan_parts.len();
        repairs.orphaned_items = orphan_items.len();
        repairs.discarded_groups = discarded.len();
        repairs.failed_deletes = self
            .repair(region, &orphan_parts, &orphan_items, &discarded)
            .await;

        info!(
            region = %region,
            groups = groups.len(),
            orphaned_parts = repairs.orphaned_parts,
            orphaned_items = repairs.orphaned_items,
            discarded_groups = repairs.discarded_groups,
            malformed_rows = repairs.malformed_rows,
            withheld_rows = repairs.withheld_rows,
            "Region scene loaded"
        );

        Ok(RegionLoad { groups, repairs })
    }

    /// Delete orphans and discarded groups. Returns the number of failed
    /// statements.
    async fn repair(
        &self,
        region: RegionId,
        parts: &[PartId],
        items: &[ItemId],
        groups: &[GroupId],
    ) -> usize {
        let mut failed = 0_usize;

        for chunk in items.chunks(self.chunk_size) {
            if let Err(e) = self.store.delete_items(chunk).await {
                warn!(region = %region, rows = chunk.len(), error = %e, "Failed to delete orphaned items");
                failed = failed.saturating_add(1);
            }
        }
        for chunk in parts.chunks(self.chunk_size) {
            if let Err(e) = self.store.delete_parts(chunk).await {
                warn!(region = %region, rows = chunk.len(), error = %e, "Failed to delete orphaned parts");
                failed = failed.saturating_add(1);
            }
        }
        for chunk in groups.chunks(self.chunk_size) {
            if let Err(e) = self.store.delete_groups(chunk).await {
                warn!(region = %region, rows = chunk.len(), error = %e, "Failed to delete corrupt groups");
                failed = failed.saturating_add(1);
            }
        }

        failed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use strata_db::{MemoryStore, StatementKind};
    use strata_types::{
        AgentId, GroupAttributes, Inventory, PartAppearance, ROOT_LINK_NUMBER, Transform,
    };

    use super::*;

    fn header(region: RegionId, root: PartId) -> GroupHeader {
        GroupHeader {
            id: GroupId::new(),
            region_id: region,
            name: String::from("crate"),
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
            name: String::from("lid"),
            owner_id: AgentId::new(),
            creator_id: AgentId::new(),
            transform: Transform::default(),
            appearance: PartAppearance::default(),
            serial: 1,
            inventory: Inventory::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_region_loads_clean() {
        let store = MemoryStore::new();
        let load = GraphLoader::new(&store, 256).load(RegionId::new()).await.unwrap();
        assert!(load.groups.is_empty());
        assert!(load.repairs.is_clean());
        assert!(store.statements().is_empty());
    }

    #[tokio::test]
    async fn orphaned_parts_are_deleted_in_chunks() {
        let region = RegionId::new();
        let store = MemoryStore::new();
        let missing_group = GroupId::new();
        for link in 0..5 {
            store
                .upsert_parts(region, &[part(PartId::new(), missing_group, link)])
                .await
                .unwrap();
        }
        store.clear_statements();

        let load = GraphLoader::new(&store, 2).load(region).await.unwrap();

        assert_eq!(load.repairs.orphaned_parts, 5);
        assert_eq!(store.statement_count(StatementKind::DeleteParts), 3);
        assert!(store.part_rows().is_empty());
    }

    #[tokio::test]
    async fn group_without_parts_is_discarded() {
        let region = RegionId::new();
        let store = MemoryStore::new();
        let header = header(region, PartId::new());
        store.upsert_groups(&[header.clone()]).await.unwrap();

        let load = GraphLoader::new(&store, 256).load(region).await.unwrap();

        assert!(load.groups.is_empty());
        assert_eq!(load.repairs.discarded_groups, 1);
        assert!(store.group_rows().is_empty());
    }

    #[tokio::test]
    async fn unreadable_store_fails_the_load() {
        let region = RegionId::new();
        let store = MemoryStore::new();
        let root = PartId::new();
        let header = header(region, root);
        store.upsert_groups(&[header.clone()]).await.unwrap();
        store
            .upsert_parts(region, &[part(root, header.id, ROOT_LINK_NUMBER)])
            .await
            .unwrap();
        store
            .upsert_parts(region, &[part(PartId::new(), GroupId::new(), 2)])
            .await
            .unwrap();

        let loader = GraphLoader::new(&store, 256);
        let load = loader.load(region).await.unwrap();
        assert_eq!(load.groups.len(), 1);
        assert_eq!(load.part_count(), 1);
        assert_eq!(load.repairs.failed_deletes, 0);

        store.set_unavailable(true);
        assert!(matches!(loader.load(region).await, Err(LoadError::Store(_))));
    }
}
