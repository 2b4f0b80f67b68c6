//! Scene fixtures shared by the `strata-persist` behavioral tests.

#![allow(
    dead_code,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use chrono::Utc;
use strata_types::{
    AgentId, AssetId, GroupAttributes, GroupHeader, GroupId, Inventory, InventoryItem, ItemId,
    ObjectPart, PartAppearance, PartChange, PartId, Permissions, ROOT_LINK_NUMBER, RegionId,
    Transform, Vector3,
};

/// A group header plus its parts, ready to be turned into changes.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub header: GroupHeader,
    pub parts: Vec<ObjectPart>,
}

impl Fixture {
    /// A group of `part_count` parts (root first) in `region`.
    pub fn group(region: RegionId, part_count: usize) -> Self {
        let owner = AgentId::new();
        let root_id = PartId::new();
        let header = GroupHeader {
            id: GroupId::new(),
            region_id: region,
            name: String::from("market stall"),
            owner_id: owner,
            root_part_id: root_id,
            attributes: GroupAttributes::default(),
        };
        let parts = (0..part_count)
            .map(|i| {
                let link = ROOT_LINK_NUMBER.saturating_add(i32::try_from(i).unwrap());
                let id = if i == 0 { root_id } else { PartId::new() };
                part(id, header.id, link, owner)
            })
            .collect();
        Self { header, parts }
    }

    pub fn root(&self) -> &ObjectPart {
        &self.parts[0]
    }

    /// An update change for the part at `index`.
    pub fn update(&self, index: usize) -> PartChange {
        PartChange::update(self.header.clone(), self.parts[index].clone())
    }

    /// A kill change for the part at `index`.
    pub fn kill(&self, index: usize) -> PartChange {
        PartChange::killed(self.header.clone(), self.parts[index].clone())
    }

    /// Give the part at `index` a fresh inventory of `count` items.
    pub fn stock(&mut self, index: usize, serial: u64, count: usize) {
        let part = &mut self.parts[index];
        let items = (0..count).map(|_| item(part.id, serial));
        part.inventory = Inventory::new(serial, items);
    }

    /// Bump the serial of the part at `index`, as a mutation would.
    pub fn touch(&mut self, index: usize) {
        let part = &mut self.parts[index];
        part.serial = part.serial.saturating_add(1);
        part.transform.position = Vector3::new(1.0, 2.0, part.transform.position.z + 1.0);
    }
}

pub fn part(id: PartId, group_id: GroupId, link_number: i32, owner: AgentId) -> ObjectPart {
    ObjectPart {
        id,
        group_id,
        link_number,
        name: format!("panel {link_number}"),
        owner_id: owner,
        creator_id: owner,
        transform: Transform::default(),
        appearance: PartAppearance {
            shape: vec![9, 1, 0, 0],
            texture_entry: vec![0x7F; 24],
            extra_params: Vec::new(),
            particle_system: Vec::new(),
        },
        serial: 1,
        inventory: Inventory::default(),
        created_at: Utc::now(),
    }
}

pub fn item(part_id: PartId, inventory_serial: u64) -> InventoryItem {
    InventoryItem {
        id: ItemId::new(),
        part_id,
        asset_id: AssetId::new(),
        name: String::from("price list"),
        description: String::from("notecard"),
        asset_type: 7,
        permissions: Permissions {
            base: 0x7FFF_FFFF,
            owner: 0x7FFF_FFFF,
            group: 0,
            everyone: 0,
            next_owner: 0x0008_2000,
        },
        inventory_serial,
    }
}
