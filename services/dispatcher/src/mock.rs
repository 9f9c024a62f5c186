//! In-memory platform and mission page.
//!
//! Used by the binary until a browser driver is wired in, and by tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mcd_id::{MissionId, VehicleId};
use tracing::{debug, info};

use crate::platform::{
    CollaboratorError, DispatchMode, MissionPage, Platform, RawInventory, WaterStatus,
};
use crate::requirements::RawMission;

#[derive(Debug, Default)]
struct PlatformState {
    inventory: RawInventory,
    missions: BTreeMap<MissionId, RawMission>,
    broken: HashSet<MissionId>,
}

/// Mock platform with a fixed fleet and an editable mission list.
#[derive(Debug, Default, Clone)]
pub struct MockPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add vehicles under a platform type name.
    pub fn with_vehicles(self, platform_type: &str, ids: impl IntoIterator<Item = u64>) -> Self {
        self.insert_vehicles(platform_type, ids);
        self
    }

    /// Add vehicles to the fleet of a running platform.
    pub fn insert_vehicles(&self, platform_type: &str, ids: impl IntoIterator<Item = u64>) {
        self.lock()
            .inventory
            .entry(platform_type.to_string())
            .or_default()
            .extend(ids.into_iter().map(VehicleId::from));
    }

    pub fn with_mission(self, id: impl Into<MissionId>, raw: RawMission) -> Self {
        self.insert_mission(id.into(), raw);
        self
    }

    pub fn insert_mission(&self, id: MissionId, raw: RawMission) {
        self.lock().missions.insert(id, raw);
    }

    pub fn remove_mission(&self, id: &MissionId) {
        self.lock().missions.remove(id);
    }

    /// Make extraction of a listed mission fail with a page error.
    pub fn break_mission(&self, id: MissionId) {
        self.lock().broken.insert(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn fetch_inventory(&self) -> Result<RawInventory, CollaboratorError> {
        let inventory = self.lock().inventory.clone();
        info!(types = inventory.len(), "[MOCK] Fetched vehicle inventory");
        Ok(inventory)
    }

    async fn list_missions(&self) -> Result<Vec<MissionId>, CollaboratorError> {
        Ok(self.lock().missions.keys().cloned().collect())
    }

    async fn extract_mission(&self, id: &MissionId) -> Result<RawMission, CollaboratorError> {
        let state = self.lock();
        if state.broken.contains(id) {
            return Err(CollaboratorError::Page(format!(
                "mission {id} page did not render"
            )));
        }
        state
            .missions
            .get(id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(id.clone()))
    }
}

/// One dispatch pressed on a [`MockPage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub mission_id: MissionId,
    pub mode: DispatchMode,
    pub vehicles: Vec<VehicleId>,
}

/// Shared log of dispatches across pages.
pub type DispatchJournal = Arc<Mutex<Vec<DispatchRecord>>>;

/// Mock mission page.
///
/// Distances, refused vehicles and water capacities are fixed at
/// construction. The page remembers the vehicles selected since the last
/// `open_mission` and reports the water bar from them.
#[derive(Debug, Default)]
pub struct MockPage {
    distances: HashMap<VehicleId, u64>,
    refused: HashSet<VehicleId>,
    water_capacity: HashMap<VehicleId, u32>,
    water_needed: HashMap<MissionId, u32>,
    alliance_button: bool,
    failing_dispatch: bool,
    failing_water_bar: bool,
    current: Option<MissionId>,
    selected: Vec<VehicleId>,
    journal: DispatchJournal,
}

impl MockPage {
    pub fn new() -> Self {
        Self {
            alliance_button: true,
            ..Default::default()
        }
    }

    pub fn with_distance(mut self, id: u64, seconds: u64) -> Self {
        self.distances.insert(VehicleId::from(id), seconds);
        self
    }

    pub fn with_distances(mut self, pairs: impl IntoIterator<Item = (u64, u64)>) -> Self {
        for (id, seconds) in pairs {
            self.distances.insert(VehicleId::from(id), seconds);
        }
        self
    }

    /// The page will not let this vehicle be selected.
    pub fn refusing(mut self, id: u64) -> Self {
        self.refused.insert(VehicleId::from(id));
        self
    }

    /// Gallons a vehicle adds to the water bar when selected.
    pub fn with_water_capacity(mut self, id: u64, gallons: u32) -> Self {
        self.water_capacity.insert(VehicleId::from(id), gallons);
        self
    }

    pub fn with_water_needed(mut self, mission: impl Into<MissionId>, gallons: u32) -> Self {
        self.water_needed.insert(mission.into(), gallons);
        self
    }

    pub fn without_alliance_button(mut self) -> Self {
        self.alliance_button = false;
        self
    }

    pub fn failing_dispatch(mut self) -> Self {
        self.failing_dispatch = true;
        self
    }

    /// Reading the water bar fails with a page error.
    pub fn failing_water_bar(mut self) -> Self {
        self.failing_water_bar = true;
        self
    }

    /// Record dispatches into a shared journal.
    pub fn with_journal(mut self, journal: DispatchJournal) -> Self {
        self.journal = journal;
        self
    }

    pub fn journal(&self) -> DispatchJournal {
        Arc::clone(&self.journal)
    }

    /// Vehicles selected since the mission was opened.
    pub fn selected(&self) -> &[VehicleId] {
        &self.selected
    }

    fn current(&self) -> Result<&MissionId, CollaboratorError> {
        self.current
            .as_ref()
            .ok_or_else(|| CollaboratorError::Page("no mission open".to_string()))
    }
}

#[async_trait]
impl MissionPage for MockPage {
    async fn open_mission(&mut self, id: &MissionId) -> Result<(), CollaboratorError> {
        debug!(mission_id = %id, "[MOCK] Opening mission page");
        self.current = Some(id.clone());
        self.selected.clear();
        Ok(())
    }

    async fn distances(
        &mut self,
        ids: &[VehicleId],
    ) -> Result<HashMap<VehicleId, u64>, CollaboratorError> {
        self.current()?;
        Ok(ids
            .iter()
            .filter_map(|id| self.distances.get(id).map(|d| (id.clone(), *d)))
            .collect())
    }

    async fn select_vehicle(&mut self, id: &VehicleId) -> Result<bool, CollaboratorError> {
        self.current()?;
        if self.refused.contains(id) || self.selected.contains(id) {
            return Ok(false);
        }
        self.selected.push(id.clone());
        Ok(true)
    }

    async fn water_status(&mut self) -> Result<WaterStatus, CollaboratorError> {
        if self.failing_water_bar {
            return Err(CollaboratorError::Page("water bar not found".to_string()));
        }
        let needed = self.water_needed.get(self.current()?).copied().unwrap_or(0);
        let selected = self
            .selected
            .iter()
            .filter_map(|id| self.water_capacity.get(id))
            .sum();
        Ok(WaterStatus { selected, needed })
    }

    async fn dispatch(&mut self, mode: DispatchMode) -> Result<bool, CollaboratorError> {
        let mission_id = self.current()?.clone();
        if self.failing_dispatch {
            return Err(CollaboratorError::Page("dispatch button did not respond".to_string()));
        }
        if mode == DispatchMode::Alliance && !self.alliance_button {
            return Ok(false);
        }

        info!(
            mission_id = %mission_id,
            mode = %mode,
            vehicles = self.selected.len(),
            "[MOCK] Dispatched mission"
        );
        self.journal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(DispatchRecord {
                mission_id,
                mode,
                vehicles: std::mem::take(&mut self.selected),
            });
        Ok(true)
    }
}
