//! Shared domain types for the Strata region persistence engine.
//!
//! This crate holds the in-memory shape of everything the engine writes to
//! and reads back from the relational store. It performs no I/O.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for regions, groups, parts, items
//! - [`scene`] -- Object groups, parts, inventories, and group finalization
//! - [`terrain`] -- Height-field patches
//! - [`events`] -- Change notifications produced by the simulation loop

pub mod events;
pub mod ids;
pub mod scene;
pub mod terrain;

// Re-export all public types at crate root for convenience.
pub use events::{ChangeKind, PartChange, TerrainChange};
pub use ids::{AgentId, AssetId, GroupId, ItemId, PartId, RegionId};
pub use scene::{
    GraphError, GroupAttributes, GroupHeader, Inventory, InventoryItem, ObjectGroup, ObjectPart,
    PartAppearance, Permissions, Quaternion, ROOT_LINK_NUMBER, Transform, Vector3,
};
pub use terrain::{PatchIndex, TerrainPatch};
