//! Concurrent allocation against one shared lock table.
//!
//! Many missions allocate at once from overlapping pools. Whatever the
//! interleaving, no vehicle may end up claimed by two missions, every claim
//! must be backed by a lock held by the claiming mission, and missions
//! rolled back by the dispatch gate must hold nothing.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use mcd_dispatcher::mock::MockPage;
use mcd_dispatcher::requirements::VehicleRequirement;
use mcd_dispatcher::{
    Allocator, Canonicalizer, DispatchPolicy, GateDecision, MissionPage,
    MissionRequirementRecord, Tables, VehicleInventory, VehicleLockTable, VehicleType,
};
use mcd_id::{MissionId, VehicleId};
use proptest::prelude::*;

const TYPES: [&str; 3] = ["ambulance", "firetruck", "police car"];

#[derive(Debug, Clone)]
struct Scenario {
    /// Vehicles per type.
    fleet: Vec<usize>,
    /// Per mission: (type index, count) requirements.
    missions: Vec<Vec<(usize, u32)>>,
    distance_seed: u64,
    allow_incomplete: bool,
}

fn scenario() -> impl Strategy<Value = Scenario> {
    (
        prop::collection::vec(0usize..6, TYPES.len()),
        prop::collection::vec(prop::collection::vec((0usize..TYPES.len(), 1u32..4), 1..4), 2..8),
        any::<u64>(),
        any::<bool>(),
    )
        .prop_map(|(fleet, missions, distance_seed, allow_incomplete)| Scenario {
            fleet,
            missions,
            distance_seed,
            allow_incomplete,
        })
}

fn build_inventory(fleet: &[usize]) -> VehicleInventory {
    let mut next_id = 1u64;
    let mut by_type = BTreeMap::new();
    for (type_index, count) in fleet.iter().enumerate() {
        let ids: Vec<VehicleId> = (0..*count)
            .map(|_| {
                let id = VehicleId::from(next_id);
                next_id += 1;
                id
            })
            .collect();
        by_type.insert(VehicleType::new(TYPES[type_index]), ids);
    }
    VehicleInventory::new(by_type)
}

/// Distances differ per mission so that missions contend for the same
/// nearest vehicles in different orders.
fn page_for(mission_index: u64, seed: u64, vehicles: u64) -> MockPage {
    MockPage::new().with_distances((1..=vehicles).map(|id| {
        let mixed = id
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(seed)
            .wrapping_add(mission_index.wrapping_mul(31));
        (id, mixed % 3600)
    }))
}

async fn run_scenario(scenario: Scenario) -> Result<(), TestCaseError> {
    let tables = Arc::new(Tables::builtin().unwrap());
    let locks = Arc::new(VehicleLockTable::new());
    let allocator = Allocator::new(
        Canonicalizer::new(tables),
        Arc::clone(&locks),
        DispatchPolicy {
            allow_incomplete: scenario.allow_incomplete,
            ..Default::default()
        },
    );
    let inventory = Arc::new(build_inventory(&scenario.fleet));
    let vehicles = inventory.vehicle_count() as u64;

    let mut handles = Vec::new();
    for (index, requirements) in scenario.missions.iter().enumerate() {
        let mission = MissionId::from(1000 + index as u64);
        let mut record = MissionRequirementRecord::new(mission.clone(), "Contended");
        record.vehicles = requirements
            .iter()
            .map(|(type_index, count)| {
                VehicleRequirement::new(vec![VehicleType::new(TYPES[*type_index])], *count)
            })
            .collect();

        let allocator = allocator.clone();
        let inventory = Arc::clone(&inventory);
        let mut page = page_for(index as u64, scenario.distance_seed, vehicles);

        handles.push(tokio::spawn(async move {
            page.open_mission(&mission).await.unwrap();
            let outcome = allocator
                .allocate(&record, &inventory, &mut page)
                .await
                .unwrap();
            let decision = allocator.gate(&mission, &outcome);
            (mission, outcome, decision)
        }));
    }

    let mut seen: HashSet<VehicleId> = HashSet::new();
    for handle in handles {
        let (mission, outcome, decision) = handle.await.unwrap();
        let held = locks.locks_for(&mission);

        match decision {
            GateDecision::Dispatch => {
                prop_assert_eq!(held.len(), outcome.claimed.len());
                for vehicle in &outcome.claimed {
                    prop_assert!(held.contains(vehicle));
                    prop_assert!(seen.insert(vehicle.clone()), "{} claimed twice", vehicle);
                }
            }
            GateDecision::Abandon { .. } => {
                prop_assert!(!scenario.allow_incomplete);
                prop_assert!(held.is_empty());
            }
        }
    }

    prop_assert_eq!(locks.len(), seen.len());
    prop_assert!(seen.len() as u64 <= vehicles);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_no_vehicle_claimed_by_two_missions(scenario in scenario()) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_scenario(scenario))?;
    }

    #[test]
    fn test_release_all_frees_every_claim(
        claims in prop::collection::vec((0u64..4, 0u64..32), 0..64),
        released in 0u64..4,
    ) {
        let locks = VehicleLockTable::new();
        for (mission, vehicle) in &claims {
            locks.try_lock(&VehicleId::from(*vehicle), &MissionId::from(*mission));
        }
        let mission = MissionId::from(released);
        let before = locks.locks_for(&mission);

        prop_assert_eq!(locks.release_all(&mission), before.len());
        prop_assert!(locks.locks_for(&mission).is_empty());
        prop_assert_eq!(locks.release_all(&mission), 0);

        let other = MissionId::from(99u64);
        for vehicle in &before {
            prop_assert!(locks.try_lock(vehicle, &other));
        }
    }
}
