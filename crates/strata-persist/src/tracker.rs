//! Dirty tracking for the scene write-back worker.
//!
//! The tracker remembers, per part, the part serial and inventory serial
//! most recently scheduled for writing, plus the item identities that
//! inventory held. Comparing an incoming change against these tells the
//! worker whether anything needs to reach the store at all.
//!
//! Two kinds of state outlive a failed flush so the next delivery repairs
//! it. Items whose delete failed stay listed as stale for their part, and
//! the part's inventory is rewritten next time. Parts whose delete has not
//! been confirmed keep a tombstone, so a later delivery for them issues
//! the delete again (or, if the part is back, clears out its old items).
//!
//! A tracker belongs to exactly one worker task and is never shared.

use std::collections::{BTreeMap, BTreeSet};

use strata_types::{ChangeKind, GroupId, ItemId, ObjectGroup, PartChange, PartId};

/// What the worker must do for one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Nothing to persist.
    Ignore,
    /// Delete the part and its inventory rows.
    DeletePart(PartId),
    /// Delete the group, all its parts, and their inventory rows.
    DeleteGroup {
        /// The group to delete.
        group: GroupId,
        /// Parts the tracker knew as members of the group.
        parts: Vec<PartId>,
    },
    /// Write the part row, its inventory, or both.
    Write(PartWrite),
}

/// The writes required for a changed part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartWrite {
    /// The part row (and, for a root part, the group row) must be written.
    pub part: bool,
    /// The inventory must be rewritten.
    pub inventory: Option<InventoryWrite>,
}

/// A full inventory rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InventoryWrite {
    /// Items known from the previous write that are no longer present.
    pub removed: Vec<ItemId>,
}

/// A part deleted by the tracker whose delete has not reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Tombstone {
    group: GroupId,
    items: BTreeSet<ItemId>,
}

/// Per-part serial bookkeeping owned by a single worker.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    part_serials: BTreeMap<PartId, u64>,
    inventory_serials: BTreeMap<PartId, u64>,
    known_items: BTreeMap<PartId, BTreeSet<ItemId>>,
    part_groups: BTreeMap<PartId, GroupId>,
    members: BTreeMap<GroupId, BTreeSet<PartId>>,
    stale_items: BTreeMap<PartId, BTreeSet<ItemId>>,
    tombstones: BTreeMap<PartId, Tombstone>,
}

impl DirtyTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a group read back from the store as already persisted.
    pub fn seed(&mut self, group: &ObjectGroup) {
        for part in group.parts() {
            self.part_serials.insert(part.id, part.serial);
            self.inventory_serials
                .insert(part.id, part.inventory.serial);
            self.known_items
                .insert(part.id, part.inventory.item_ids());
            self.join_group(part.id, group.id());
        }
    }

    /// Decide what `change` requires and record it as scheduled.
    pub fn classify(&mut self, change: &PartChange) -> Classification {
        let part_id = change.part_id();

        if change.kind == ChangeKind::Killed {
            return self.delete(change);
        }

        let Some(&known_serial) = self.part_serials.get(&part_id) else {
            if change.is_ephemeral() {
                return if self.tombstones.contains_key(&part_id) {
                    self.delete(change)
                } else {
                    Classification::Ignore
                };
            }
            let previous = self
                .tombstones
                .remove(&part_id)
                .map(|tombstone| tombstone.items)
                .unwrap_or_default();
            let removed = self.removed_items(part_id, previous, change);
            self.record(change);
            return Classification::Write(PartWrite {
                part: true,
                inventory: Some(InventoryWrite { removed }),
            });
        };

        if change.is_ephemeral() {
            return self.delete(change);
        }

        let part = known_serial != change.serial();

        // Compared against the inventory serial map, not the part serial map.
        let inventory = if self.inventory_serials.get(&part_id) == Some(&change.inventory_serial()) {
            None
        } else {
            let previous = self.known_items.get(&part_id).cloned().unwrap_or_default();
            let removed = self.removed_items(part_id, previous, change);
            Some(InventoryWrite { removed })
        };

        if !part && inventory.is_none() {
            return Classification::Ignore;
        }

        self.record(change);
        Classification::Write(PartWrite { part, inventory })
    }

    /// Items of `previous` and stale items of `part` that `change` no
    /// longer holds. The stale list is consumed.
    fn removed_items(
        &mut self,
        part: PartId,
        mut previous: BTreeSet<ItemId>,
        change: &PartChange,
    ) -> Vec<ItemId> {
        if let Some(stale) = self.stale_items.remove(&part) {
            previous.extend(stale);
        }
        let current = change.part.inventory.item_ids();
        previous.difference(&current).copied().collect()
    }

    fn delete(&mut self, change: &PartChange) -> Classification {
        let part_id = change.part_id();
        let group = change.group_id();
        if change.is_root() {
            let mut parts: BTreeSet<PartId> = self
                .members
                .get(&group)
                .cloned()
                .unwrap_or_default();
            parts.extend(
                self.tombstones
                    .iter()
                    .filter(|(_, tombstone)| tombstone.group == group)
                    .map(|(&part, _)| part),
            );
            // The root may have been filed under another group before a relink.
            parts.insert(part_id);
            for &part in &parts {
                self.bury(part, group);
            }
            Classification::DeleteGroup {
                group,
                parts: parts.into_iter().collect(),
            }
        } else {
            self.bury(part_id, group);
            Classification::DeletePart(part_id)
        }
    }

    /// Forget a live part and keep a tombstone until its delete is settled.
    fn bury(&mut self, part: PartId, group: GroupId) {
        let mut items = self.known_items.get(&part).cloned().unwrap_or_default();
        if let Some(stale) = self.stale_items.remove(&part) {
            items.extend(stale);
        }
        if let Some(earlier) = self.tombstones.remove(&part) {
            items.extend(earlier.items);
        }
        self.forget_part(part);
        self.tombstones.insert(part, Tombstone { group, items });
    }

    fn record(&mut self, change: &PartChange) {
        let part_id = change.part_id();
        self.part_serials.insert(part_id, change.serial());
        self.inventory_serials
            .insert(part_id, change.inventory_serial());
        self.known_items
            .insert(part_id, change.part.inventory.item_ids());
        self.join_group(part_id, change.group_id());
    }

    fn join_group(&mut self, part: PartId, group: GroupId) {
        if let Some(previous) = self
            .part_groups
            .insert(part, group)
            .filter(|&previous| previous != group)
        {
            self.leave_group(part, previous);
        }
        self.members.entry(group).or_default().insert(part);
    }

    fn leave_group(&mut self, part: PartId, group: GroupId) {
        if let Some(members) = self.members.get_mut(&group) {
            members.remove(&part);
            if members.is_empty() {
                self.members.remove(&group);
            }
        }
    }

    /// Drop everything known about a part.
    pub fn forget_part(&mut self, part: PartId) {
        self.part_serials.remove(&part);
        self.inventory_serials.remove(&part);
        self.known_items.remove(&part);
        if let Some(group) = self.part_groups.remove(&part) {
            self.leave_group(part, group);
        }
    }

    /// Drop the inventory serial of a part so its next change rewrites the
    /// inventory.
    pub fn forget_inventory(&mut self, part: PartId) {
        self.inventory_serials.remove(&part);
    }

    /// An item row removed from `part` could not be deleted. The part's
    /// next change rewrites its inventory and deletes the item again.
    pub fn restore_removed(&mut self, part: PartId, item: ItemId) {
        if let Some(tombstone) = self.tombstones.get_mut(&part) {
            tombstone.items.insert(item);
            return;
        }
        self.stale_items.entry(part).or_default().insert(item);
        self.inventory_serials.remove(&part);
    }

    /// The deletes of `parts` reached the store.
    pub fn settle_parts(&mut self, parts: &[PartId]) {
        for part in parts {
            self.tombstones.remove(part);
        }
    }

    /// The deletes of `groups` reached the store, taking their parts along.
    pub fn settle_groups(&mut self, groups: &[GroupId]) {
        self.tombstones
            .retain(|_, tombstone| !groups.contains(&tombstone.group));
    }

    /// Whether a delete of `part` is still waiting to reach the store.
    pub fn is_unsettled(&self, part: PartId) -> bool {
        self.tombstones.contains_key(&part)
    }

    /// Part serial last scheduled for `part`.
    pub fn part_serial(&self, part: PartId) -> Option<u64> {
        self.part_serials.get(&part).copied()
    }

    /// Inventory serial last scheduled for `part`.
    pub fn inventory_serial(&self, part: PartId) -> Option<u64> {
        self.inventory_serials.get(&part).copied()
    }

    /// Whether `part` has been scheduled or seeded.
    pub fn is_known(&self, part: PartId) -> bool {
        self.part_serials.contains_key(&part)
    }

    /// Number of tracked parts.
    pub fn len(&self) -> usize {
        self.part_serials.len()
    }

    /// Whether no part is tracked.
    pub fn is_empty(&self) -> bool {
        self.part_serials.is_empty()
    }
}
