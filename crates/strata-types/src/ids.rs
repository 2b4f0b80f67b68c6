//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Regions, object groups, parts, and inventory items all share the same
//! UUID representation in the store. Wrapping each in its own newtype keeps
//! a part identity from ever being bound where a group identity is expected.
//!
//! The simulation assigns identities when it creates an object; the `new()`
//! constructors here exist for tests and for tools that mint objects
//! outside the simulation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identity of a region, the partitioning scope of all persisted state.
    RegionId
}

define_id! {
    /// Identity of a composite scene object (a linked set of parts).
    GroupId
}

define_id! {
    /// Identity of a single rigid part inside an object group.
    PartId
}

define_id! {
    /// Identity of an inventory entry attached to a part.
    ItemId
}

define_id! {
    /// Reference to an asset held by the asset service.
    AssetId
}

define_id! {
    /// Identity of an avatar or account (owners, creators).
    AgentId
}
