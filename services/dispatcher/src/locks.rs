//! Vehicle lock table.
//!
//! Process-wide registry of exclusive claims: vehicle → mission. It is the
//! only mutable state shared between allocation workers. Every operation
//! takes the internal mutex for the whole read-modify-write, so for any
//! vehicle at most one mission holds a lock at any instant a caller can
//! observe.
//!
//! Locks never expire. They are released explicitly, per mission, when the
//! mission is abandoned or disappears from the mission list. The mutex is
//! never held across an await point.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use mcd_id::{MissionId, VehicleId};
use tracing::{debug, info};

/// Exclusive vehicle claims, shared by all allocators.
#[derive(Debug, Default)]
pub struct VehicleLockTable {
    locks: Mutex<HashMap<VehicleId, MissionId>>,
}

impl VehicleLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<VehicleId, MissionId>> {
        // A panic while holding the guard cannot leave the map half-updated:
        // each operation is a single insert/remove/retain.
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `vehicle` for `mission` if nobody holds it.
    ///
    /// Returns false, without side effects, when the vehicle is already
    /// locked (by this or any other mission).
    pub fn try_lock(&self, vehicle: &VehicleId, mission: &MissionId) -> bool {
        let mut locks = self.guard();
        if locks.contains_key(vehicle) {
            return false;
        }
        locks.insert(vehicle.clone(), mission.clone());
        true
    }

    pub fn is_locked(&self, vehicle: &VehicleId) -> bool {
        self.guard().contains_key(vehicle)
    }

    /// Mission currently holding `vehicle`.
    pub fn holder(&self, vehicle: &VehicleId) -> Option<MissionId> {
        self.guard().get(vehicle).cloned()
    }

    /// Release a single vehicle, only if `mission` holds it.
    pub fn release(&self, vehicle: &VehicleId, mission: &MissionId) -> bool {
        let mut locks = self.guard();
        if locks.get(vehicle) == Some(mission) {
            locks.remove(vehicle);
            true
        } else {
            false
        }
    }

    /// Release every lock held by `mission`. Idempotent.
    ///
    /// Returns the number of vehicles released.
    pub fn release_all(&self, mission: &MissionId) -> usize {
        let released = {
            let mut locks = self.guard();
            let before = locks.len();
            locks.retain(|_, holder| holder != mission);
            before - locks.len()
        };

        if released > 0 {
            info!(mission_id = %mission, released, "Released vehicles for mission");
        } else {
            debug!(mission_id = %mission, "No vehicles to release");
        }
        released
    }

    /// Vehicles currently locked by `mission`.
    pub fn locks_for(&self, mission: &MissionId) -> BTreeSet<VehicleId> {
        self.guard()
            .iter()
            .filter(|(_, holder)| *holder == mission)
            .map(|(vehicle, _)| vehicle.clone())
            .collect()
    }

    /// Missions holding at least one lock.
    pub fn missions(&self) -> BTreeSet<MissionId> {
        self.guard().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn v(id: u64) -> VehicleId {
        VehicleId::from(id)
    }

    fn m(id: u64) -> MissionId {
        MissionId::from(id)
    }

    #[test]
    fn test_try_lock_is_exclusive() {
        let table = VehicleLockTable::new();
        assert!(table.try_lock(&v(1), &m(100)));
        assert!(!table.try_lock(&v(1), &m(200)));
        assert!(!table.try_lock(&v(1), &m(100)));
        assert_eq!(table.holder(&v(1)), Some(m(100)));
        assert!(table.is_locked(&v(1)));
        assert!(!table.is_locked(&v(2)));
    }

    #[test]
    fn test_release_all_frees_vehicles() {
        let table = VehicleLockTable::new();
        table.try_lock(&v(1), &m(100));
        table.try_lock(&v(2), &m(100));
        table.try_lock(&v(3), &m(200));

        assert_eq!(table.release_all(&m(100)), 2);
        assert!(table.locks_for(&m(100)).is_empty());
        assert!(table.try_lock(&v(1), &m(200)));
        assert_eq!(table.locks_for(&m(200)).len(), 2);

        // Idempotent, also for missions that never held anything.
        assert_eq!(table.release_all(&m(100)), 0);
        assert_eq!(table.release_all(&m(999)), 0);
    }

    #[test]
    fn test_release_single_requires_holder() {
        let table = VehicleLockTable::new();
        table.try_lock(&v(1), &m(100));
        assert!(!table.release(&v(1), &m(200)));
        assert!(table.release(&v(1), &m(100)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_try_lock_single_winner() {
        let table = Arc::new(VehicleLockTable::new());
        let handles: Vec<_> = (0..16u64)
            .map(|mission| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    (0..64u64)
                        .filter(|vehicle| table.try_lock(&v(*vehicle), &m(mission)))
                        .count()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 64);
        assert_eq!(table.len(), 64);
    }
}
