//! Change notifications pushed by the simulation loop.
//!
//! Each notification carries the full current state of the changed entity,
//! not a delta. Persistence workers compare the carried serials against the
//! serials they last scheduled to recognise redundant deliveries.

use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, PartId};
use crate::scene::{GroupHeader, ObjectPart};
use crate::terrain::TerrainPatch;

/// What happened to a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The part was created or mutated.
    Update,
    /// The part (or, for a root part, its whole group) was removed for good.
    Killed,
}

/// A change notification for one part of an object group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartChange {
    /// Update or kill.
    pub kind: ChangeKind,
    /// Header of the group the part belongs to at the time of the change.
    pub group: GroupHeader,
    /// Current part state, including the inventory valid at
    /// `part.inventory.serial`.
    pub part: ObjectPart,
    /// The group is worn by an avatar.
    pub is_attached: bool,
    /// The group is temporary and will be cleaned up by the simulation.
    pub is_temporary: bool,
}

impl PartChange {
    /// An update notification.
    pub const fn update(group: GroupHeader, part: ObjectPart) -> Self {
        Self {
            kind: ChangeKind::Update,
            group,
            part,
            is_attached: false,
            is_temporary: false,
        }
    }

    /// A kill notification.
    pub const fn killed(group: GroupHeader, part: ObjectPart) -> Self {
        Self {
            kind: ChangeKind::Killed,
            group,
            part,
            is_attached: false,
            is_temporary: false,
        }
    }

    /// Identity of the changed part.
    pub const fn part_id(&self) -> PartId {
        self.part.id
    }

    /// Identity of the owning group.
    pub const fn group_id(&self) -> GroupId {
        self.group.id
    }

    /// Link number of the changed part.
    pub const fn link_number(&self) -> i32 {
        self.part.link_number
    }

    /// Part serial carried by this notification.
    pub const fn serial(&self) -> u64 {
        self.part.serial
    }

    /// Inventory serial carried by this notification.
    pub const fn inventory_serial(&self) -> u64 {
        self.part.inventory.serial
    }

    /// Whether the changed part is the group root.
    pub const fn is_root(&self) -> bool {
        self.part.is_root()
    }

    /// Whether the owning group is attached or temporary and so must
    /// never be stored.
    pub const fn is_ephemeral(&self) -> bool {
        self.is_attached || self.is_temporary
    }
}

/// A change notification for a region's terrain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerrainChange {
    /// A patch was edited.
    Patch(TerrainPatch),
    /// Copy the region's current patches into its default terrain.
    Snapshot,
}
