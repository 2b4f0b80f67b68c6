//! Relational store for the Strata region persistence engine.
//!
//! `PostgreSQL` holds every region's object groups, parts, part
//! inventories, and terrain patches. The persistence workers and loaders
//! reach it only through the [`SceneBackend`] and [`TerrainBackend`]
//! traits, so an in-memory [`MemoryStore`] can stand in for it.
//!
//! # Architecture
//!
//! ```text
//! PersistenceWorker / TerrainWriter / GraphLoader
//!     |
//!     +-- SceneBackend   --> SceneStore   (object_groups, object_parts,
//!     |                                    part_inventory_items)
//!     +-- TerrainBackend --> TerrainStore (terrain_patches, terrain_defaults)
//! ```
//!
//! # Modules
//!
//! - [`backend`] -- Store traits consumed by the engine
//! - [`postgres`] -- Shared `PostgreSQL` pool and schema migrations
//! - [`scene_store`] -- Batch upserts, cascading deletes, bulk reads of scene rows
//! - [`terrain_store`] -- Patch upserts and the default-terrain snapshot
//! - [`memory`] -- In-memory store with a statement log
//! - [`rows`] -- Row shapes and row/domain conversion
//! - [`error`] -- Shared error types

pub mod backend;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod rows;
pub mod scene_store;
pub mod terrain_store;

// Re-export primary types for convenience.
pub use backend::{SceneBackend, TerrainBackend};
pub use error::{DbError, RowError};
pub use memory::{MemoryStore, Statement, StatementKind};
pub use postgres::{PoolSettings, PostgresPool};
pub use rows::{GroupRow, ItemRow, PartRow, PatchRow};
pub use scene_store::SceneStore;
pub use terrain_store::TerrainStore;
