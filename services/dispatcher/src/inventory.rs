//! Vehicle inventory: canonical type → vehicle ids.
//!
//! The inventory is rebuilt wholesale from the platform and never patched in
//! place. [`InventoryHandle`] holds the current snapshot behind an `ArcSwap`:
//! allocators load a consistent snapshot without blocking, a refresh swaps in
//! a new one, and readers still holding the old snapshot finish on it.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use mcd_id::VehicleId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::canonical::{Canonicalizer, VehicleType};

/// Immutable inventory snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleInventory {
    by_type: BTreeMap<VehicleType, Vec<VehicleId>>,
}

impl VehicleInventory {
    /// Build from already-canonical types.
    pub fn new(by_type: BTreeMap<VehicleType, Vec<VehicleId>>) -> Self {
        Self { by_type }
    }

    /// Build from the platform's own type names.
    ///
    /// Platform names are canonicalized; names collapsing to the same type
    /// are merged. Within a type, ids keep their first-seen order and appear
    /// once.
    pub fn from_platform(
        raw: BTreeMap<String, Vec<VehicleId>>,
        canonicalizer: &Canonicalizer,
    ) -> Self {
        let mut by_type: BTreeMap<VehicleType, Vec<VehicleId>> = BTreeMap::new();
        for (platform_type, ids) in raw {
            let ids_for_type = by_type
                .entry(canonicalizer.vehicle_type(&platform_type))
                .or_default();
            for id in ids {
                if !ids_for_type.contains(&id) {
                    ids_for_type.push(id);
                }
            }
        }
        Self { by_type }
    }

    /// Vehicle ids of a type in inventory order, or `None` if the type is
    /// unknown to the fleet.
    pub fn candidates(&self, vehicle_type: &VehicleType) -> Option<&[VehicleId]> {
        self.by_type.get(vehicle_type).map(Vec::as_slice)
    }

    /// Total number of vehicles.
    pub fn vehicle_count(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.values().all(Vec::is_empty)
    }
}

/// Shared, atomically replaceable reference to the current inventory.
#[derive(Debug)]
pub struct InventoryHandle {
    current: ArcSwap<VehicleInventory>,
}

impl InventoryHandle {
    pub fn new(inventory: VehicleInventory) -> Self {
        Self {
            current: ArcSwap::from_pointee(inventory),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<VehicleInventory> {
        self.current.load_full()
    }

    /// Swap in a new snapshot.
    pub fn replace(&self, inventory: VehicleInventory) {
        let types = inventory.by_type.len();
        let vehicles = inventory.vehicle_count();
        self.current.store(Arc::new(inventory));
        info!(types, vehicles, "Vehicle inventory replaced");
    }
}

impl Default for InventoryHandle {
    fn default() -> Self {
        Self::new(VehicleInventory::default())
    }
}
