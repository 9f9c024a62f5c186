//! Vehicle allocation.
//!
//! Given a mission's requirement record, the current inventory snapshot and
//! the shared lock table, the allocator claims vehicles for the mission and
//! reports what it could not cover.
//!
//! Requirements are processed in a fixed order:
//! 1. personnel, converted to vehicles through the capacity table
//! 2. vehicle requirements, options in declared priority
//! 3. tow units for crashed cars
//! 4. water, driven by the page's live water bar
//!
//! Within a pool, candidates are ranked by travel time (unknown last, ties
//! in inventory order). A candidate is claimed by taking its lock first and
//! then selecting it on the page; if the page refuses, the lock is given
//! back immediately.
//!
//! The allocator never holds the lock table across an await: every lock
//! operation is a single synchronous call.

use std::collections::HashMap;
use std::sync::Arc;

use mcd_id::{MissionId, VehicleId};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::canonical::{Canonicalizer, VehicleType};
use crate::config::DispatchPolicy;
use crate::inventory::VehicleInventory;
use crate::locks::VehicleLockTable;
use crate::platform::{CollaboratorError, MissionPage};
use crate::requirements::{MissionRequirementRecord, PersonnelRequirement, VehicleRequirement};
use crate::tables::SKIPPED_ROLES;

pub const FLATBED_CARRIER: &str = "flatbed carrier";
pub const WRECKER_POOL: &[&str] = &["wrecker", "police wrecker", "fire wrecker"];
pub const WATER_TANKER: &str = "water tanker";
pub const FIRETRUCK: &str = "firetruck";

/// Crashed cars one flatbed carrier takes away.
const CARS_PER_FLATBED: u32 = 2;

const TOW_LABEL: &str = "tow vehicle";
const WATER_LABEL: &str = "water";

/// Unmet part of one requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortfall {
    pub label: String,
    pub count: u32,
}

impl Shortfall {
    pub fn new(label: impl Into<String>, count: u32) -> Self {
        Self {
            label: label.into(),
            count,
        }
    }
}

/// Result of allocating one mission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllocationOutcome {
    /// Vehicles claimed, in claim order.
    pub claimed: Vec<VehicleId>,
    pub shortfall: Vec<Shortfall>,
}

impl AllocationOutcome {
    pub fn is_complete(&self) -> bool {
        self.shortfall.is_empty()
    }

    /// Shortfall as "label(count), ..." for operator logs.
    pub fn shortfall_summary(&self) -> String {
        self.shortfall
            .iter()
            .map(|s| format!("{}({})", s.label, s.count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Outcome of the dispatch gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Dispatch,
    /// Claims were rolled back.
    Abandon { released: usize },
}

/// Claims vehicles for missions against a shared lock table.
#[derive(Debug, Clone)]
pub struct Allocator {
    canonicalizer: Canonicalizer,
    locks: Arc<VehicleLockTable>,
    policy: DispatchPolicy,
}

impl Allocator {
    pub fn new(
        canonicalizer: Canonicalizer,
        locks: Arc<VehicleLockTable>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            canonicalizer,
            locks,
            policy,
        }
    }

    pub fn locks(&self) -> &Arc<VehicleLockTable> {
        &self.locks
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Allocate vehicles for one mission.
    ///
    /// The mission page must already be open. On a collaborator error the
    /// vehicles claimed so far stay locked; callers roll back with
    /// [`VehicleLockTable::release_all`].
    #[instrument(skip_all, fields(mission_id = %record.mission_id))]
    pub async fn allocate<P>(
        &self,
        record: &MissionRequirementRecord,
        inventory: &VehicleInventory,
        page: &mut P,
    ) -> Result<AllocationOutcome, CollaboratorError>
    where
        P: MissionPage + ?Sized,
    {
        let mut run = AllocationRun {
            locks: &self.locks,
            mission_id: &record.mission_id,
            inventory,
            page,
            outcome: AllocationOutcome::default(),
        };

        let mut vehicles = record.vehicles.clone();
        for requirement in &record.personnel {
            self.allocate_personnel(&mut run, requirement, &mut vehicles)
                .await?;
        }

        for requirement in &vehicles {
            self.allocate_vehicles(&mut run, requirement).await?;
        }

        if record.crashed_cars > 0 {
            self.allocate_tow(&mut run, record.crashed_cars).await?;
        }

        self.allocate_water(&mut run, !record.liquid.is_empty()).await?;

        let outcome = run.outcome;
        debug!(
            claimed = outcome.claimed.len(),
            shortfall = outcome.shortfall.len(),
            "Allocation finished"
        );
        Ok(outcome)
    }

    /// Apply the dispatch gate.
    ///
    /// With incomplete dispatch disallowed, a mission with any shortfall
    /// gives all of its claims back.
    pub fn gate(&self, mission_id: &MissionId, outcome: &AllocationOutcome) -> GateDecision {
        if outcome.is_complete() || self.policy.allow_incomplete {
            return GateDecision::Dispatch;
        }

        warn!(
            mission_id = %mission_id,
            missing = %outcome.shortfall_summary(),
            "Mission missing requirements, releasing claims"
        );
        GateDecision::Abandon {
            released: self.locks.release_all(mission_id),
        }
    }

    fn record_shortfall(&self, outcome: &mut AllocationOutcome, label: &str, count: u32) {
        if count == 0 {
            return;
        }
        debug!(label, count, "Requirement not fully covered");
        if !self.policy.allow_incomplete {
            outcome.shortfall.push(Shortfall::new(label, count));
        }
    }

    async fn allocate_personnel<P: MissionPage + ?Sized>(
        &self,
        run: &mut AllocationRun<'_, P>,
        requirement: &PersonnelRequirement,
        vehicles: &mut [VehicleRequirement],
    ) -> Result<(), CollaboratorError> {
        if requirement.count == 0 || SKIPPED_ROLES.contains(&requirement.role.as_str()) {
            return Ok(());
        }

        let capacities = self.canonicalizer.tables().capacities.vehicles_for(&requirement.role);
        if capacities.is_empty() {
            warn!(role = %requirement.role, "No vehicle type carries this role");
        }

        let mut covered: u32 = 0;
        for capacity in capacities {
            if covered >= requirement.count {
                break;
            }

            let remaining = requirement.count - covered;
            let wanted = remaining.div_ceil(capacity.people);
            let used = run
                .claim(std::slice::from_ref(&capacity.vehicle_type), wanted)
                .await?;
            covered = covered.saturating_add(used.saturating_mul(capacity.people));

            // Vehicles sent for personnel also count toward plain vehicle
            // requirements of the same type.
            for vehicle in vehicles
                .iter_mut()
                .filter(|v| v.accepts(&capacity.vehicle_type))
            {
                vehicle.count = vehicle.count.saturating_sub(used);
            }
        }

        self.record_shortfall(
            &mut run.outcome,
            requirement.role.as_str(),
            requirement.count.saturating_sub(covered),
        );
        Ok(())
    }

    async fn allocate_vehicles<P: MissionPage + ?Sized>(
        &self,
        run: &mut AllocationRun<'_, P>,
        requirement: &VehicleRequirement,
    ) -> Result<(), CollaboratorError> {
        if requirement.count == 0 {
            return Ok(());
        }

        let mut claimed: u32 = 0;
        for option in &requirement.options {
            if claimed >= requirement.count {
                break;
            }
            claimed += run
                .claim(std::slice::from_ref(option), requirement.count - claimed)
                .await?;
        }

        self.record_shortfall(
            &mut run.outcome,
            &requirement.label(),
            requirement.count - claimed,
        );
        Ok(())
    }

    async fn allocate_tow<P: MissionPage + ?Sized>(
        &self,
        run: &mut AllocationRun<'_, P>,
        crashed_cars: u32,
    ) -> Result<(), CollaboratorError> {
        let flatbed = [self.canonicalizer.vehicle_type(FLATBED_CARRIER)];
        let flatbeds = run
            .claim(&flatbed, crashed_cars.div_ceil(CARS_PER_FLATBED))
            .await?;
        let mut remaining = crashed_cars.saturating_sub(flatbeds * CARS_PER_FLATBED);

        if remaining > 0 {
            let wreckers: Vec<VehicleType> = WRECKER_POOL
                .iter()
                .map(|name| self.canonicalizer.vehicle_type(name))
                .collect();
            remaining -= run.claim(&wreckers, remaining).await?;
        }

        self.record_shortfall(&mut run.outcome, TOW_LABEL, remaining);
        Ok(())
    }

    /// Claim water carriers one at a time until the page's water bar is
    /// full or neither pool yields another vehicle.
    ///
    /// The bar is read even when no water row was scraped. An unreadable bar
    /// only fails the mission when water was listed.
    async fn allocate_water<P: MissionPage + ?Sized>(
        &self,
        run: &mut AllocationRun<'_, P>,
        water_listed: bool,
    ) -> Result<(), CollaboratorError> {
        let mut status = match run.page.water_status().await {
            Ok(status) => status,
            Err(e) if !water_listed => {
                debug!(error = %e, "Water bar unreadable, mission lists no water");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if status.is_satisfied() {
            return Ok(());
        }

        let tanker = [self.canonicalizer.vehicle_type(WATER_TANKER)];
        let firetruck = [self.canonicalizer.vehicle_type(FIRETRUCK)];

        // Every iteration either claims a vehicle or stops, so the pools
        // bound the loop. The explicit limit guards against a page that
        // accepts vehicles without the bar moving.
        let limit = run.pool_size(&tanker) + run.pool_size(&firetruck);
        let mut iterations = 0;

        while !status.is_satisfied() && iterations <= limit {
            iterations += 1;

            let progressed =
                run.claim(&tanker, 1).await? > 0 || run.claim(&firetruck, 1).await? > 0;
            status = run.page.water_status().await?;

            if !progressed {
                debug!(deficit = status.deficit(), "No water carrier left to claim");
                break;
            }
        }

        self.record_shortfall(&mut run.outcome, WATER_LABEL, status.deficit());
        Ok(())
    }
}

/// State of one mission's allocation.
struct AllocationRun<'a, P: ?Sized> {
    locks: &'a VehicleLockTable,
    mission_id: &'a MissionId,
    inventory: &'a VehicleInventory,
    page: &'a mut P,
    outcome: AllocationOutcome,
}

impl<P: MissionPage + ?Sized> AllocationRun<'_, P> {
    /// Number of vehicles of the given types in the inventory.
    fn pool_size(&self, types: &[VehicleType]) -> usize {
        types
            .iter()
            .filter_map(|t| self.inventory.candidates(t))
            .map(<[VehicleId]>::len)
            .sum()
    }

    /// Unlocked vehicles of the given types, in inventory order.
    fn candidates(&self, types: &[VehicleType]) -> Vec<VehicleId> {
        let mut candidates: Vec<VehicleId> = Vec::new();
        for vehicle_type in types {
            let Some(ids) = self.inventory.candidates(vehicle_type) else {
                warn!(vehicle_type = %vehicle_type, "No vehicles of this type in inventory");
                continue;
            };
            for id in ids {
                if !self.locks.is_locked(id) && !candidates.contains(id) {
                    candidates.push(id.clone());
                }
            }
        }
        candidates
    }

    /// Claim up to `wanted` vehicles from the union of `types`, nearest
    /// first. Returns the number claimed.
    async fn claim(
        &mut self,
        types: &[VehicleType],
        wanted: u32,
    ) -> Result<u32, CollaboratorError> {
        if wanted == 0 {
            return Ok(0);
        }

        let mut candidates = self.candidates(types);
        if candidates.is_empty() {
            return Ok(0);
        }

        let distances = match self.page.distances(&candidates).await {
            Ok(distances) => distances,
            Err(e) => {
                warn!(error = %e, "Distance lookup failed, using inventory order");
                HashMap::new()
            }
        };
        candidates.sort_by_key(|id| distances.get(id).copied().unwrap_or(u64::MAX));

        let mut claimed: u32 = 0;
        for id in candidates {
            if claimed == wanted {
                break;
            }

            if !self.locks.try_lock(&id, self.mission_id) {
                debug!(vehicle_id = %id, "Vehicle claimed by another mission");
                continue;
            }

            match self.page.select_vehicle(&id).await {
                Ok(true) => {
                    info!(
                        mission_id = %self.mission_id,
                        vehicle_id = %id,
                        distance = %format_distance(distances.get(&id).copied()),
                        "Claimed vehicle"
                    );
                    self.outcome.claimed.push(id);
                    claimed += 1;
                }
                Ok(false) => {
                    self.locks.release(&id, self.mission_id);
                    debug!(vehicle_id = %id, "Page refused vehicle");
                }
                Err(e) => {
                    self.locks.release(&id, self.mission_id);
                    return Err(e);
                }
            }
        }

        Ok(claimed)
    }
}

/// Human-readable travel time.
pub fn format_distance(seconds: Option<u64>) -> String {
    match seconds {
        None => "unknown".to_string(),
        Some(s) if s < 60 => format!("{s} sec"),
        Some(s) if s < 3600 => format!("{} min {} sec", s / 60, s % 60),
        Some(s) => format!("{} hr {} min", s / 3600, (s % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::mock::MockPage;
    use crate::platform::WaterStatus;
    use crate::requirements::LiquidRequirement;
    use crate::tables::Tables;

    fn canonicalizer() -> Canonicalizer {
        Canonicalizer::new(Arc::new(Tables::builtin().unwrap()))
    }

    fn allocator(locks: Arc<VehicleLockTable>, allow_incomplete: bool) -> Allocator {
        Allocator::new(
            canonicalizer(),
            locks,
            DispatchPolicy {
                allow_incomplete,
                ..Default::default()
            },
        )
    }

    fn inventory(entries: &[(&str, &[u64])]) -> VehicleInventory {
        VehicleInventory::new(
            entries
                .iter()
                .map(|(t, ids)| {
                    (
                        VehicleType::new(*t),
                        ids.iter().copied().map(VehicleId::from).collect(),
                    )
                })
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn ids(raw: &[u64]) -> Vec<VehicleId> {
        raw.iter().copied().map(VehicleId::from).collect()
    }

    async fn open(page: &mut MockPage, mission: &MissionId) {
        page.open_mission(mission).await.unwrap();
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(None), "unknown");
        assert_eq!(format_distance(Some(42)), "42 sec");
        assert_eq!(format_distance(Some(125)), "2 min 5 sec");
        assert_eq!(format_distance(Some(7380)), "2 hr 3 min");
    }

    #[tokio::test]
    async fn test_option_priority_before_distance() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), false);
        let mission = MissionId::from(1u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Fire");
        record.vehicles.push(VehicleRequirement::new(
            vec![VehicleType::new("arff"), VehicleType::new("firetruck")],
            2,
        ));

        let inv = inventory(&[("arff", &[10]), ("firetruck", &[20, 21])]);
        let mut page = MockPage::new().with_distances([(10, 900), (20, 5), (21, 50)]);
        open(&mut page, &mission).await;

        let outcome = allocator.allocate(&record, &inv, &mut page).await.unwrap();
        assert_eq!(outcome.claimed, ids(&[10, 20]));
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_unknown_distance_ranks_last() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), false);
        let mission = MissionId::from(1u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Crash");
        record
            .vehicles
            .push(VehicleRequirement::new(vec![VehicleType::new("ambulance")], 2));

        let inv = inventory(&[("ambulance", &[1, 2, 3])]);
        let mut page = MockPage::new().with_distance(3, 100);
        open(&mut page, &mission).await;

        let outcome = allocator.allocate(&record, &inv, &mut page).await.unwrap();
        assert_eq!(outcome.claimed, ids(&[3, 1]));
    }

    #[tokio::test]
    async fn test_refused_vehicle_lock_returned() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), false);
        let mission = MissionId::from(1u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Crash");
        record
            .vehicles
            .push(VehicleRequirement::new(vec![VehicleType::new("ambulance")], 1));

        let inv = inventory(&[("ambulance", &[1, 2])]);
        let mut page = MockPage::new().with_distances([(1, 10), (2, 20)]).refusing(1);
        open(&mut page, &mission).await;

        let outcome = allocator.allocate(&record, &inv, &mut page).await.unwrap();
        assert_eq!(outcome.claimed, ids(&[2]));
        assert!(!locks.is_locked(&VehicleId::from(1u64)));
    }

    #[tokio::test]
    async fn test_missing_type_is_shortfall() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), false);
        let mission = MissionId::from(1u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Spill");
        record.vehicles.push(VehicleRequirement::new(
            vec![VehicleType::new("hazmat vehicle")],
            1,
        ));

        let mut page = MockPage::new();
        open(&mut page, &mission).await;

        let outcome = allocator
            .allocate(&record, &VehicleInventory::default(), &mut page)
            .await
            .unwrap();
        assert_eq!(outcome.shortfall, vec![Shortfall::new("hazmat vehicle", 1)]);
    }

    #[tokio::test]
    async fn test_personnel_credits_partial_claims() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), false);
        let mission = MissionId::from(1u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Hostage");
        record.personnel.push(PersonnelRequirement {
            role: crate::canonical::PersonnelRole::new("swat personnel"),
            count: 16,
        });

        // One armoured vehicle (6) leaves 10, covered by three SUVs (4 each).
        let inv = inventory(&[("swat armoured vehicle", &[1]), ("swat suv", &[2, 3, 4, 5])]);
        let mut page = MockPage::new();
        open(&mut page, &mission).await;

        let outcome = allocator.allocate(&record, &inv, &mut page).await.unwrap();
        assert_eq!(outcome.claimed, ids(&[1, 2, 3, 4]));
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_skipped_roles_never_short() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), false);
        let mission = MissionId::from(1u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Collapse");
        record.personnel.push(PersonnelRequirement {
            role: crate::canonical::PersonnelRole::new("usar"),
            count: 5,
        });

        let mut page = MockPage::new();
        open(&mut page, &mission).await;

        let outcome = allocator
            .allocate(&record, &VehicleInventory::default(), &mut page)
            .await
            .unwrap();
        assert!(outcome.is_complete());
        assert!(outcome.claimed.is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_allowed_keeps_claims() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), true);
        let mission = MissionId::from(1u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Fire");
        record
            .vehicles
            .push(VehicleRequirement::new(vec![VehicleType::new("firetruck")], 3));

        let inv = inventory(&[("firetruck", &[1])]);
        let mut page = MockPage::new();
        open(&mut page, &mission).await;

        let outcome = allocator.allocate(&record, &inv, &mut page).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(allocator.gate(&mission, &outcome), GateDecision::Dispatch);
        assert_eq!(locks.locks_for(&mission).len(), 1);
    }

    #[tokio::test]
    async fn test_water_fills_from_tankers_then_firetrucks() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), false);
        let mission = MissionId::from(1u64);
        let record = MissionRequirementRecord::new(mission.clone(), "Brush fire");

        let inv = inventory(&[("water tanker", &[1]), ("firetruck", &[2, 3])]);
        let mut page = MockPage::new()
            .with_water_needed(1u64, 3000)
            .with_water_capacity(1, 2000)
            .with_water_capacity(2, 500)
            .with_water_capacity(3, 750);
        open(&mut page, &mission).await;

        let outcome = allocator.allocate(&record, &inv, &mut page).await.unwrap();
        assert_eq!(outcome.claimed, ids(&[1, 2, 3]));
        assert!(outcome.is_complete());
        assert_eq!(
            page.water_status().await.unwrap(),
            WaterStatus {
                selected: 3250,
                needed: 3000
            }
        );
    }

    #[tokio::test]
    async fn test_unreadable_water_bar_ignored_without_water_rows() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), false);
        let mission = MissionId::from(1u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Car fire");
        record
            .vehicles
            .push(VehicleRequirement::new(vec![VehicleType::new("firetruck")], 1));

        let inv = inventory(&[("firetruck", &[7])]);
        let mut page = MockPage::new().failing_water_bar();
        open(&mut page, &mission).await;

        let outcome = allocator.allocate(&record, &inv, &mut page).await.unwrap();
        assert_eq!(outcome.claimed, ids(&[7]));
        assert_eq!(allocator.gate(&mission, &outcome), GateDecision::Dispatch);
    }

    #[tokio::test]
    async fn test_unreadable_water_bar_fails_when_water_listed() {
        let locks = Arc::new(VehicleLockTable::new());
        let allocator = allocator(Arc::clone(&locks), false);
        let mission = MissionId::from(1u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Brush fire");
        record.liquid.push(LiquidRequirement {
            liquid: VehicleType::new("water"),
            amount: 2000,
        });

        let inv = inventory(&[("water tanker", &[1])]);
        let mut page = MockPage::new().failing_water_bar();
        open(&mut page, &mission).await;

        let err = allocator.allocate(&record, &inv, &mut page).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Page(_)));
    }
}
