//! Scene object model: object groups, their parts, and part inventories.
//!
//! An [`ObjectGroup`] is a linked set of [`ObjectPart`]s keyed by link
//! number. Exactly one part carries [`ROOT_LINK_NUMBER`] and its identity
//! must match the group's declared root. Shape and rendering parameters are
//! carried as opaque byte payloads; this layer never interprets them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, AssetId, GroupId, ItemId, PartId, RegionId};

/// Link number carried by the root part of every object group.
pub const ROOT_LINK_NUMBER: i32 = 1;

// ---------------------------------------------------------------------------
// Spatial values
// ---------------------------------------------------------------------------

/// A three-component vector (region-local metres for positions).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    /// East-west component.
    pub x: f32,
    /// North-south component.
    pub y: f32,
    /// Vertical component.
    pub z: f32,
}

impl Vector3 {
    /// Construct a vector from its components.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// A rotation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
    /// Scalar component.
    pub w: f32,
}

impl Quaternion {
    /// The identity rotation.
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Placement of a part: position and rotation relative to the group
/// root (or the region, for the root itself), plus scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Offset from the root part, or region position for the root.
    pub position: Vector3,
    /// Orientation.
    pub rotation: Quaternion,
    /// Size along each axis.
    pub scale: Vector3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vector3::default(),
            rotation: Quaternion::IDENTITY,
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

/// Opaque shape and rendering payloads of a part.
///
/// The persistence layer guarantees byte-exact round trips of every field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartAppearance {
    /// Serialized primitive shape parameters.
    pub shape: Vec<u8>,
    /// Serialized per-face texture entry.
    pub texture_entry: Vec<u8>,
    /// Serialized extra parameters (flexible, light, sculpt).
    pub extra_params: Vec<u8>,
    /// Serialized particle system definition.
    pub particle_system: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Permission masks of an inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    /// Upper bound of every other mask.
    pub base: u32,
    /// Rights of the current owner.
    pub owner: u32,
    /// Rights of members of the object's group.
    pub group: u32,
    /// Rights of everyone else.
    pub everyone: u32,
    /// Rights applied on transfer to the next owner.
    pub next_owner: u32,
}

/// An inventory entry attached to a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Item identity.
    pub id: ItemId,
    /// The part whose inventory holds this item.
    pub part_id: PartId,
    /// Referenced asset.
    pub asset_id: AssetId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Asset type code.
    pub asset_type: i32,
    /// Permission masks.
    pub permissions: Permissions,
    /// Inventory serial of the owning part's inventory when this item was
    /// last written.
    pub inventory_serial: u64,
}

/// The inventory of one part: its serial and items ordered by identity.
///
/// The order is by [`ItemId`], not by arrival. The inventory table has no
/// position column, so identity order is the only order that survives a
/// write and reload unchanged. Item ids are UUID v7, so this is also the
/// order in which items were created.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Inventory {
    /// Incremented on every inventory mutation.
    pub serial: u64,
    /// Items keyed by identity.
    pub items: BTreeMap<ItemId, InventoryItem>,
}

impl Inventory {
    /// Create an inventory holding `items` at `serial`.
    pub fn new(serial: u64, items: impl IntoIterator<Item = InventoryItem>) -> Self {
        Self {
            serial,
            items: items.into_iter().map(|item| (item.id, item)).collect(),
        }
    }

    /// Identities of every item currently held.
    pub fn item_ids(&self) -> BTreeSet<ItemId> {
        self.items.keys().copied().collect()
    }

    /// Add or replace an item.
    pub fn insert(&mut self, item: InventoryItem) {
        self.items.insert(item.id, item);
    }

    /// Number of items held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the inventory holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Parts and groups
// ---------------------------------------------------------------------------

/// A rigid sub-component of an object group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPart {
    /// Part identity.
    pub id: PartId,
    /// The group this part belongs to.
    pub group_id: GroupId,
    /// Position of this part in the group's link set.
    pub link_number: i32,
    /// Display name.
    pub name: String,
    /// Current owner.
    pub owner_id: AgentId,
    /// Original creator.
    pub creator_id: AgentId,
    /// Placement.
    pub transform: Transform,
    /// Opaque shape and rendering payloads.
    pub appearance: PartAppearance,
    /// Incremented on every mutation of the part.
    pub serial: u64,
    /// Items held by this part.
    pub inventory: Inventory,
    /// When the part was created.
    pub created_at: DateTime<Utc>,
}

impl ObjectPart {
    /// Whether this part is the root of its group.
    pub const fn is_root(&self) -> bool {
        self.link_number == ROOT_LINK_NUMBER
    }
}

/// Group-level attributes stored alongside the group row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupAttributes {
    /// Free-form description.
    pub description: String,
    /// Sale price in the region currency.
    pub sale_price: i32,
    /// Sale mode code (0 = not for sale).
    pub sale_type: u8,
    /// Default action when the object is clicked.
    pub click_action: u8,
}

/// The identity and metadata of an object group, without its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHeader {
    /// Group identity.
    pub id: GroupId,
    /// The region the group lives in.
    pub region_id: RegionId,
    /// Display name.
    pub name: String,
    /// Current owner.
    pub owner_id: AgentId,
    /// Identity of the part carrying [`ROOT_LINK_NUMBER`].
    pub root_part_id: PartId,
    /// Additional group attributes.
    pub attributes: GroupAttributes,
}

/// Reasons a set of parts cannot be finalized into an [`ObjectGroup`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// No parts were attached to the group.
    #[error("group {group} has no parts")]
    NoParts {
        /// The empty group.
        group: GroupId,
    },

    /// A part declares a different owning group.
    #[error("part {part} of group {group} declares group {declared}")]
    ForeignPart {
        /// The group being finalized.
        group: GroupId,
        /// The offending part.
        part: PartId,
        /// The group the part claims to belong to.
        declared: GroupId,
    },

    /// Two parts share a link number.
    #[error("group {group} has more than one part with link number {link_number}")]
    DuplicateLinkNumber {
        /// The group being finalized.
        group: GroupId,
        /// The repeated link number.
        link_number: i32,
    },

    /// No part carries the root link number.
    #[error("group {group} has no root part")]
    MissingRoot {
        /// The group being finalized.
        group: GroupId,
    },

    /// The root part is not the part the group header names.
    #[error("group {group} declares root {expected} but its root link is {found}")]
    RootMismatch {
        /// The group being finalized.
        group: GroupId,
        /// Root identity from the group header.
        expected: PartId,
        /// Identity of the part at the root link number.
        found: PartId,
    },
}

/// A composite scene object: a header and its parts ordered by link number.
///
/// Only constructed through [`ObjectGroup::assemble`], so every value
/// upholds the root and membership invariants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectGroup {
    header: GroupHeader,
    parts: BTreeMap<i32, ObjectPart>,
}

impl ObjectGroup {
    /// Attach `parts` to `header` and validate the result.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] if there are no parts, a part belongs to
    /// another group, link numbers collide, or the root part is missing or
    /// is not the one named by the header.
    pub fn assemble(header: GroupHeader, parts: Vec<ObjectPart>) -> Result<Self, GraphError> {
        let group = header.id;
        if parts.is_empty() {
            return Err(GraphError::NoParts { group });
        }

        let mut by_link = BTreeMap::new();
        for part in parts {
            if part.group_id != group {
                return Err(GraphError::ForeignPart {
                    group,
                    part: part.id,
                    declared: part.group_id,
                });
            }
            let link_number = part.link_number;
            if by_link.insert(link_number, part).is_some() {
                return Err(GraphError::DuplicateLinkNumber { group, link_number });
            }
        }

        let root = by_link
            .get(&ROOT_LINK_NUMBER)
            .ok_or(GraphError::MissingRoot { group })?;
        if root.id != header.root_part_id {
            return Err(GraphError::RootMismatch {
                group,
                expected: header.root_part_id,
                found: root.id,
            });
        }

        Ok(Self {
            header,
            parts: by_link,
        })
    }

    /// Group identity.
    pub const fn id(&self) -> GroupId {
        self.header.id
    }

    /// Group header.
    pub const fn header(&self) -> &GroupHeader {
        &self.header
    }

    /// The root part.
    pub fn root(&self) -> Option<&ObjectPart> {
        self.parts.get(&ROOT_LINK_NUMBER)
    }

    /// The part at `link_number`, if any.
    pub fn part(&self, link_number: i32) -> Option<&ObjectPart> {
        self.parts.get(&link_number)
    }

    /// Parts in link-number order.
    pub fn parts(&self) -> impl Iterator<Item = &ObjectPart> {
        self.parts.values()
    }

    /// Number of parts.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }
}
