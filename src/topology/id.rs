//! Topology identifiers: lightweight, ordered, copyable newtypes.
//!
//! Each ID is an index into the owning `Topology` table, wrapped so that
//! a port index can never be passed where a node index is expected.

use serde::{Deserialize, Serialize};

macro_rules! topology_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            pub const fn new(id: u64) -> Self {
                $name(id)
            }

            #[inline]
            pub fn raw(self) -> u64 {
                self.0
            }

            #[inline]
            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

topology_id!(
    /// A network endpoint holding a quantum memory and named ports.
    NodeId,
    "N"
);
topology_id!(
    /// A named, directed endpoint on a node, detector or source.
    PortId,
    "P"
);
topology_id!(
    /// A one-directional delay channel between two ports.
    ChannelId,
    "C"
);
topology_id!(
    /// A midpoint heralding detector.
    DetectorId,
    "D"
);
topology_id!(
    /// A periodic entangled-pair source.
    SourceId,
    "S"
);
