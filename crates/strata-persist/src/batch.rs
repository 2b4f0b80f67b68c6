//! Pending writes of the scene worker and the rules for when they flush.
//!
//! Upserts are keyed by identity, so a second write of the same row inside
//! one batch window replaces the first. Deletes cancel any pending upsert
//! of the rows they remove.

use std::collections::{BTreeMap, BTreeSet};

use strata_types::{GroupHeader, GroupId, InventoryItem, ItemId, ObjectPart, PartId};

/// Whether a batch holding `pending` entries should flush now.
///
/// A non-empty batch flushes once the queue has drained, or as soon as it
/// grows past `threshold` regardless of the queue.
pub const fn flush_due(pending: usize, queue_empty: bool, threshold: usize) -> bool {
    pending > 0 && (queue_empty || pending > threshold)
}

/// Deletes waiting for the next flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingDeletes {
    /// Groups to delete with all their parts and inventory rows.
    pub groups: Vec<GroupId>,
    /// Parts to delete with their inventory rows.
    pub parts: Vec<PartId>,
    /// Individual inventory rows, each with the part that held it.
    pub items: Vec<(ItemId, PartId)>,
}

impl PendingDeletes {
    /// Total identities across all three kinds.
    pub const fn len(&self) -> usize {
        self.groups
            .len()
            .saturating_add(self.parts.len())
            .saturating_add(self.items.len())
    }

    /// Whether nothing is pending.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities of the pending inventory row deletes.
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|&(item, _)| item).collect()
    }
}

/// Which parts of a [`SceneBatch`] should be flushed now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct FlushPlan {
    /// Flush the pending deletes.
    pub deletes: bool,
    /// Flush the pending group rows.
    pub groups: bool,
    /// Flush the pending part rows.
    pub parts: bool,
    /// Flush the pending inventory rows.
    pub items: bool,
}

impl FlushPlan {
    /// Whether the plan flushes nothing.
    pub const fn is_empty(&self) -> bool {
        !(self.deletes || self.groups || self.parts || self.items)
    }
}

/// Pending group, part, and inventory writes of one region.
#[derive(Debug)]
pub struct SceneBatch {
    threshold: usize,
    deletes: DeleteSets,
    groups: BTreeMap<GroupId, GroupHeader>,
    parts: BTreeMap<PartId, ObjectPart>,
    items: BTreeMap<ItemId, InventoryItem>,
}

#[derive(Debug, Default)]
struct DeleteSets {
    groups: BTreeSet<GroupId>,
    parts: BTreeSet<PartId>,
    items: BTreeMap<ItemId, PartId>,
}

impl DeleteSets {
    fn len(&self) -> usize {
        self.groups
            .len()
            .saturating_add(self.parts.len())
            .saturating_add(self.items.len())
    }
}

impl SceneBatch {
    /// Create an empty batch that flushes early past `threshold` entries.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            deletes: DeleteSets::default(),
            groups: BTreeMap::new(),
            parts: BTreeMap::new(),
            items: BTreeMap::new(),
        }
    }

    /// Stage a group row.
    pub fn stage_group(&mut self, header: GroupHeader) {
        self.groups.insert(header.id, header);
    }

    /// Stage a part row. The part's inventory is not written by this row.
    pub fn stage_part(&mut self, part: ObjectPart) {
        self.parts.insert(part.id, part);
    }

    /// Stage inventory rows.
    pub fn stage_items(&mut self, items: impl IntoIterator<Item = InventoryItem>) {
        for item in items {
            self.items.insert(item.id, item);
        }
    }

    /// Schedule a group delete and cancel pending writes of the group and
    /// of `members`.
    pub fn delete_group(&mut self, group: GroupId, members: &[PartId]) {
        self.groups.remove(&group);
        let mut cancelled: BTreeSet<PartId> = members.iter().copied().collect();
        self.parts.retain(|id, part| {
            let member = part.group_id == group || cancelled.contains(id);
            if member {
                cancelled.insert(*id);
            }
            !member
        });
        self.items.retain(|_, item| !cancelled.contains(&item.part_id));
        self.deletes.parts.retain(|id| !cancelled.contains(id));
        self.deletes.groups.insert(group);
    }

    /// Schedule a part delete and cancel its pending writes.
    pub fn delete_part(&mut self, part: PartId) {
        self.parts.remove(&part);
        self.items.retain(|_, item| item.part_id != part);
        self.deletes.parts.insert(part);
    }

    /// Schedule deletes of inventory rows removed from `part` and cancel
    /// their pending writes.
    pub fn delete_items(&mut self, part: PartId, items: impl IntoIterator<Item = ItemId>) {
        for item in items {
            self.items.remove(&item);
            self.deletes.items.insert(item, part);
        }
    }

    /// Decide what to flush given whether the change queue is empty.
    ///
    /// Deletes flush whenever any upsert does, so a cycle never writes rows
    /// ahead of the deletes that precede them.
    pub fn plan(&self, queue_empty: bool) -> FlushPlan {
        let groups = flush_due(self.groups.len(), queue_empty, self.threshold);
        let parts = flush_due(self.parts.len(), queue_empty, self.threshold);
        let items = flush_due(self.items.len(), queue_empty, self.threshold);
        let pending_deletes = self.deletes.len();
        let deletes = pending_deletes > 0
            && (queue_empty || groups || parts || items || pending_deletes > self.threshold);
        FlushPlan {
            deletes,
            groups,
            parts,
            items,
        }
    }

    /// Remove and return the pending deletes.
    pub fn take_deletes(&mut self) -> PendingDeletes {
        let deletes = std::mem::take(&mut self.deletes);
        PendingDeletes {
            groups: deletes.groups.into_iter().collect(),
            parts: deletes.parts.into_iter().collect(),
            items: deletes.items.into_iter().collect(),
        }
    }

    /// Remove and return the pending group rows.
    pub fn take_groups(&mut self) -> Vec<GroupHeader> {
        std::mem::take(&mut self.groups).into_values().collect()
    }

    /// Remove and return the pending part rows.
    pub fn take_parts(&mut self) -> Vec<ObjectPart> {
        std::mem::take(&mut self.parts).into_values().collect()
    }

    /// Remove and return the pending inventory rows.
    pub fn take_items(&mut self) -> Vec<InventoryItem> {
        std::mem::take(&mut self.items).into_values().collect()
    }

    /// Number of pending upserts across all three tables.
    pub fn pending_upserts(&self) -> usize {
        self.groups
            .len()
            .saturating_add(self.parts.len())
            .saturating_add(self.items.len())
    }

    /// Number of pending deletes.
    pub fn pending_deletes(&self) -> usize {
        self.deletes.len()
    }

    /// Whether nothing at all is pending.
    pub fn is_empty(&self) -> bool {
        self.pending_upserts() == 0 && self.pending_deletes() == 0
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use chrono::Utc;
    use strata_types::{
        AgentId, AssetId, GroupAttributes, Inventory, PartAppearance, Permissions,
        ROOT_LINK_NUMBER, RegionId, Transform,
    };

    use super::*;

    fn part(group_id: GroupId, link_number: i32) -> ObjectPart {
        ObjectPart {
            id: PartId::new(),
            group_id,
            link_number,
            name: String::from("plank"),
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
            name: String::from("landmark"),
            description: String::new(),
            asset_type: 3,
            permissions: Permissions::default(),
            inventory_serial: 1,
        }
    }

    #[test]
    fn flush_rule() {
        assert!(!flush_due(0, true, 256));
        assert!(flush_due(1, true, 256));
        assert!(!flush_due(256, false, 256));
        assert!(flush_due(257, false, 256));
    }

    #[test]
    fn same_part_staged_twice_is_written_once() {
        let mut batch = SceneBatch::new(256);
        let mut first = part(GroupId::new(), 2);
        batch.stage_part(first.clone());
        first.serial = 2;
        batch.stage_part(first.clone());

        let parts = batch.take_parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].serial, 2);
    }

    #[test]
    fn nothing_flushes_while_the_queue_is_busy_and_small() {
        let mut batch = SceneBatch::new(4);
        batch.stage_part(part(GroupId::new(), 2));
        batch.delete_part(PartId::new());
        assert!(batch.plan(false).is_empty());
    }

    #[test]
    fn drained_queue_flushes_everything() {
        let mut batch = SceneBatch::new(4);
        let staged = part(GroupId::new(), 2);
        batch.stage_items([item(staged.id)]);
        batch.stage_part(staged);
        batch.delete_items(PartId::new(), [ItemId::new()]);

        let plan = batch.plan(true);
        assert!(plan.deletes && plan.parts && plan.items);
        assert!(!plan.groups);
    }

    #[test]
    fn upsert_past_threshold_carries_deletes_along() {
        let mut batch = SceneBatch::new(2);
        let group = GroupId::new();
        for link in 2..5 {
            batch.stage_part(part(group, link));
        }
        batch.delete_part(PartId::new());

        let plan = batch.plan(false);
        assert!(plan.parts);
        assert!(plan.deletes);
        assert!(!plan.items);
    }

    #[test]
    fn deletes_past_threshold_flush_alone() {
        let mut batch = SceneBatch::new(2);
        batch.delete_items(PartId::new(), [ItemId::new(), ItemId::new(), ItemId::new()]);
        let plan = batch.plan(false);
        assert!(plan.deletes);
        assert!(!plan.parts);
    }

    #[test]
    fn deleting_a_part_cancels_its_pending_writes() {
        let mut batch = SceneBatch::new(256);
        let doomed = part(GroupId::new(), 2);
        let kept = part(doomed.group_id, 3);
        batch.stage_items([item(doomed.id), item(kept.id)]);
        batch.stage_part(doomed.clone());
        batch.stage_part(kept.clone());

        batch.delete_part(doomed.id);

        let parts = batch.take_parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].id, kept.id);
        let items = batch.take_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].part_id, kept.id);
        assert_eq!(batch.take_deletes().parts, vec![doomed.id]);
    }

    #[test]
    fn deleting_a_group_cancels_member_writes() {
        let mut batch = SceneBatch::new(256);
        let root = part(GroupId::new(), ROOT_LINK_NUMBER);
        let group = root.group_id;
        // Flushed in an earlier cycle; only its inventory is pending.
        let flushed_member = PartId::new();
        let header = GroupHeader {
            id: group,
            region_id: RegionId::new(),
            name: String::from("raft"),
            owner_id: AgentId::new(),
            root_part_id: root.id,
            attributes: GroupAttributes::default(),
        };
        batch.stage_group(header);
        batch.stage_items([item(root.id), item(flushed_member)]);
        batch.stage_part(root.clone());
        batch.delete_part(flushed_member);

        batch.delete_group(group, &[flushed_member]);

        assert_eq!(batch.pending_upserts(), 0);
        let deletes = batch.take_deletes();
        assert_eq!(deletes.groups, vec![group]);
        assert!(deletes.parts.is_empty());
        assert!(batch.is_empty());
    }

    #[test]
    fn taking_empties_the_batch() {
        let mut batch = SceneBatch::new(256);
        batch.stage_part(part(GroupId::new(), 2));
        batch.delete_items(PartId::new(), [ItemId::new()]);
        assert_eq!(batch.take_parts().len(), 1);
        assert_eq!(batch.take_deletes().len(), 1);
        assert!(batch.is_empty());
        assert!(batch.plan(true).is_empty());
    }
}
