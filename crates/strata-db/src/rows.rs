//! Flat row shapes of the scene and terrain tables.
//!
//! Rows mirror the table columns one-to-one. Building a row from a domain
//! value fails only on JSON encoding or a value too large for its column,
//! never by clamping it into range; turning a row back into a
//! domain value can fail when a stored column does not parse, which bulk
//! loaders handle per row.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use strata_types::{
    GroupAttributes, GroupHeader, Inventory, InventoryItem, ObjectPart, PartAppearance,
    PatchIndex, Permissions, RegionId, TerrainPatch, Transform,
};
use uuid::Uuid;

use crate::error::{DbError, RowError};

/// Fit an unsigned serial into a `BIGINT` column.
fn serial_to_db(column: &'static str, serial: u64) -> Result<i64, DbError> {
    i64::try_from(serial).ok().ok_or(DbError::OutOfRange {
        column,
        value: serial,
    })
}

fn serial_from_db(column: &'static str, value: i64) -> Result<u64, RowError> {
    u64::try_from(value)
        .ok()
        .ok_or(RowError::OutOfRange { column, value })
}

fn json_column<T: DeserializeOwned>(
    column: &'static str,
    value: serde_json::Value,
) -> Result<T, RowError> {
    serde_json::from_value(value).map_err(|source| RowError::Json { column, source })
}

/// A row from the `object_groups` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct GroupRow {
    /// Group identity.
    pub id: Uuid,
    /// Owning region.
    pub region_id: Uuid,
    /// Display name.
    pub name: String,
    /// Current owner.
    pub owner_id: Uuid,
    /// Identity of the root part.
    pub root_part_id: Uuid,
    /// [`GroupAttributes`] as JSON.
    pub attributes: serde_json::Value,
}

impl GroupRow {
    /// Build a row from a group header.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if the attributes cannot be encoded.
    pub fn from_header(header: &GroupHeader) -> Result<Self, DbError> {
        Ok(Self {
            id: header.id.into_inner(),
            region_id: header.region_id.into_inner(),
            name: header.name.clone(),
            owner_id: header.owner_id.into_inner(),
            root_part_id: header.root_part_id.into_inner(),
            attributes: serde_json::to_value(&header.attributes)?,
        })
    }

    /// Parse the row back into a group header.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::Json`] if the attributes column is malformed.
    pub fn into_header(self) -> Result<GroupHeader, RowError> {
        let attributes: GroupAttributes = json_column("attributes", self.attributes)?;
        Ok(GroupHeader {
            id: self.id.into(),
            region_id: self.region_id.into(),
            name: self.name,
            owner_id: self.owner_id.into(),
            root_part_id: self.root_part_id.into(),
            attributes,
        })
    }
}

/// A row from the `object_parts` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PartRow {
    /// Part identity.
    pub id: Uuid,
    /// Declared owning group.
    pub group_id: Uuid,
    /// Owning region.
    pub region_id: Uuid,
    /// Link number within the group.
    pub link_number: i32,
    /// Display name.
    pub name: String,
    /// Current owner.
    pub owner_id: Uuid,
    /// Original creator.
    pub creator_id: Uuid,
    /// [`Transform`] as JSON.
    pub transform: serde_json::Value,
    /// Opaque shape payload.
    pub shape: Vec<u8>,
    /// Opaque texture entry payload.
    pub texture_entry: Vec<u8>,
    /// Opaque extra parameters payload.
    pub extra_params: Vec<u8>,
    /// Opaque particle system payload.
    pub particle_system: Vec<u8>,
    /// Part serial at the time of the write.
    pub serial: i64,
    /// When the part was created.
    pub created_at: DateTime<Utc>,
}

impl PartRow {
    /// Build a row from a part. The inventory is stored separately.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if the transform cannot be encoded
    /// and [`DbError::OutOfRange`] if the serial does not fit its column.
    pub fn from_part(region: RegionId, part: &ObjectPart) -> Result<Self, DbError> {
        Ok(Self {
            id: part.id.into_inner(),
            group_id: part.group_id.into_inner(),
            region_id: region.into_inner(),
            link_number: part.link_number,
            name: part.name.clone(),
            owner_id: part.owner_id.into_inner(),
            creator_id: part.creator_id.into_inner(),
            transform: serde_json::to_value(part.transform)?,
            shape: part.appearance.shape.clone(),
            texture_entry: part.appearance.texture_entry.clone(),
            extra_params: part.appearance.extra_params.clone(),
            particle_system: part.appearance.particle_system.clone(),
            serial: serial_to_db("serial", part.serial)?,
            created_at: part.created_at,
        })
    }

    /// Parse the row back into a part with an empty inventory.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] if the transform is malformed or the serial is
    /// negative.
    pub fn into_part(self) -> Result<ObjectPart, RowError> {
        let transform: Transform = json_column("transform", self.transform)?;
        let serial = serial_from_db("serial", self.serial)?;
        Ok(ObjectPart {
            id: self.id.into(),
            group_id: self.group_id.into(),
            link_number: self.link_number,
            name: self.name,
            owner_id: self.owner_id.into(),
            creator_id: self.creator_id.into(),
            transform,
            appearance: PartAppearance {
                shape: self.shape,
                texture_entry: self.texture_entry,
                extra_params: self.extra_params,
                particle_system: self.particle_system,
            },
            serial,
            inventory: Inventory::default(),
            created_at: self.created_at,
        })
    }
}

/// A row from the `part_inventory_items` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ItemRow {
    /// Item identity.
    pub id: Uuid,
    /// Owning part.
    pub part_id: Uuid,
    /// Owning region.
    pub region_id: Uuid,
    /// Referenced asset.
    pub asset_id: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Asset type code.
    pub asset_type: i32,
    /// [`Permissions`] as JSON.
    pub permissions: serde_json::Value,
    /// Inventory serial at the time of the write.
    pub inventory_serial: i64,
}

impl ItemRow {
    /// Build a row from an inventory item.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if the permissions cannot be
    /// encoded and [`DbError::OutOfRange`] if the serial does not fit its
    /// column.
    pub fn from_item(region: RegionId, item: &InventoryItem) -> Result<Self, DbError> {
        Ok(Self {
            id: item.id.into_inner(),
            part_id: item.part_id.into_inner(),
            region_id: region.into_inner(),
            asset_id: item.asset_id.into_inner(),
            name: item.name.clone(),
            description: item.description.clone(),
            asset_type: item.asset_type,
            permissions: serde_json::to_value(item.permissions)?,
            inventory_serial: serial_to_db("inventory_serial", item.inventory_serial)?,
        })
    }

    /// Parse the row back into an inventory item.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] if the permissions are malformed or the serial is
    /// negative.
    pub fn into_item(self) -> Result<InventoryItem, RowError> {
        let permissions: Permissions = json_column("permissions", self.permissions)?;
        let inventory_serial = serial_from_db("inventory_serial", self.inventory_serial)?;
        Ok(InventoryItem {
            id: self.id.into(),
            part_id: self.part_id.into(),
            asset_id: self.asset_id.into(),
            name: self.name,
            description: self.description,
            asset_type: self.asset_type,
            permissions,
            inventory_serial,
        })
    }
}

/// A row from the `terrain_patches` or `terrain_defaults` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PatchRow {
    /// Owning region.
    pub region_id: Uuid,
    /// Tile position.
    pub patch_index: i32,
    /// Patch serial at the time of the write.
    pub serial: i64,
    /// Serialized height data.
    pub payload: Vec<u8>,
}

impl PatchRow {
    /// Build a row from a patch.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::OutOfRange`] if the index or serial does not fit
    /// its column.
    pub fn from_patch(patch: &TerrainPatch) -> Result<Self, DbError> {
        let patch_index = i32::try_from(patch.index.0)
            .ok()
            .ok_or(DbError::OutOfRange {
                column: "patch_index",
                value: u64::from(patch.index.0),
            })?;
        Ok(Self {
            region_id: patch.region_id.into_inner(),
            patch_index,
            serial: serial_to_db("serial", patch.serial)?,
            payload: patch.payload.clone(),
        })
    }

    /// Parse the row back into a patch.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::OutOfRange`] if the index or serial is negative.
    pub fn into_patch(self) -> Result<TerrainPatch, RowError> {
        let index = u32::try_from(self.patch_index)
            .ok()
            .ok_or(RowError::OutOfRange {
                column: "patch_index",
                value: i64::from(self.patch_index),
            })?;
        let serial = serial_from_db("serial", self.serial)?;
        Ok(TerrainPatch {
            region_id: self.region_id.into(),
            index: PatchIndex(index),
            serial,
            payload: self.payload,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use strata_types::{AgentId, AssetId, GroupId, ItemId, PartId, ROOT_LINK_NUMBER, Vector3};

    use super::*;

    fn sample_part() -> ObjectPart {
        ObjectPart {
            id: PartId::new(),
            group_id: GroupId::new(),
            link_number: ROOT_LINK_NUMBER,
            name: String::from("table top"),
            owner_id: AgentId::new(),
            creator_id: AgentId::new(),
            transform: Transform {
                position: Vector3::new(128.0, 64.5, 22.25),
                ..Transform::default()
            },
            appearance: PartAppearance {
                shape: vec![0, 1, 2, 255],
                texture_entry: vec![9; 40],
                extra_params: Vec::new(),
                particle_system: vec![7],
            },
            serial: 42,
            inventory: Inventory::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn part_row_preserves_payload_bytes() {
        let part = sample_part();
        let row = PartRow::from_part(RegionId::new(), &part).unwrap();
        let restored = row.into_part().unwrap();
        assert_eq!(restored, part);
    }

    #[test]
    fn malformed_transform_is_a_row_error() {
        let mut row = PartRow::from_part(RegionId::new(), &sample_part()).unwrap();
        row.transform = serde_json::json!({ "position": "nowhere" });
        assert!(matches!(
            row.into_part(),
            Err(RowError::Json {
                column: "transform",
                ..
            })
        ));
    }

    #[test]
    fn negative_serial_is_a_row_error() {
        let mut row = PartRow::from_part(RegionId::new(), &sample_part()).unwrap();
        row.serial = -3;
        assert!(matches!(
            row.into_part(),
            Err(RowError::OutOfRange { value: -3, .. })
        ));
    }

    #[test]
    fn serial_beyond_bigint_is_rejected() {
        let mut part = sample_part();
        part.serial = u64::MAX;
        assert!(matches!(
            PartRow::from_part(RegionId::new(), &part),
            Err(DbError::OutOfRange {
                column: "serial",
                value: u64::MAX,
            })
        ));
    }

    #[test]
    fn patch_index_beyond_int_is_rejected() {
        let region = RegionId::new();
        let patch = |index: u32| TerrainPatch {
            region_id: region,
            index: PatchIndex(index),
            serial: 1,
            payload: vec![1, 2],
        };
        assert!(PatchRow::from_patch(&patch(7)).is_ok());
        for index in [u32::MAX, u32::MAX - 1] {
            assert!(matches!(
                PatchRow::from_patch(&patch(index)),
                Err(DbError::OutOfRange {
                    column: "patch_index",
                    ..
                })
            ));
        }
    }

    #[test]
    fn item_row_parses_permissions() {
        let item = InventoryItem {
            id: ItemId::new(),
            part_id: PartId::new(),
            asset_id: AssetId::new(),
            name: String::from("door script"),
            description: String::new(),
            asset_type: 10,
            permissions: Permissions {
                base: 0x7fff_ffff,
                owner: 0x7fff_ffff,
                group: 0,
                everyone: 0,
                next_owner: 0x0008_e000,
            },
            inventory_serial: 3,
        };
        let row = ItemRow::from_item(RegionId::new(), &item).unwrap();
        assert_eq!(row.into_item().unwrap(), item);
    }

    #[test]
    fn group_row_with_missing_attributes_uses_defaults() {
        let header = GroupHeader {
            id: GroupId::new(),
            region_id: RegionId::new(),
            name: String::from("bench"),
            owner_id: AgentId::new(),
            root_part_id: PartId::new(),
            attributes: GroupAttributes::default(),
        };
        let mut row = GroupRow::from_header(&header).unwrap();
        row.attributes = serde_json::json!({});
        assert_eq!(row.into_header().unwrap(), header);
    }

    #[test]
    fn negative_patch_index_is_rejected() {
        let row = PatchRow {
            region_id: Uuid::now_v7(),
            patch_index: -1,
            serial: 0,
            payload: Vec::new(),
        };
        assert!(row.into_patch().is_err());
    }
}
