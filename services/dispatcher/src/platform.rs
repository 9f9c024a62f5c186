//! Interfaces to the game platform.
//!
//! The dispatcher never talks to a browser directly. Scraping and page
//! interaction sit behind two traits:
//! - [`Platform`]: fleet and mission listing, raw mission extraction
//! - [`MissionPage`]: one open mission page per worker, used as distance
//!   oracle, claim executor and dispatch button
//!
//! These are the only suspension points of an allocation. Timeouts are the
//! implementation's business and surface as [`CollaboratorError::Timeout`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use mcd_id::{MissionId, VehicleId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::requirements::RawMission;

/// Fleet as the platform lists it: platform type name → vehicle ids.
pub type RawInventory = BTreeMap<String, Vec<VehicleId>>;

/// Failure of an external collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("page error: {0}")]
    Page(String),

    #[error("mission {0} not found")]
    NotFound(MissionId),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Which dispatch control to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Plain "alert" button.
    #[default]
    Default,
    /// "Alert and share with alliance" button.
    Alliance,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Default => f.write_str("default"),
            DispatchMode::Alliance => f.write_str("alliance"),
        }
    }
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(DispatchMode::Default),
            "alliance" => Ok(DispatchMode::Alliance),
            other => Err(format!("unknown dispatch mode '{other}'")),
        }
    }
}

/// Live water bar of an open mission page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaterStatus {
    pub selected: u32,
    pub needed: u32,
}

impl WaterStatus {
    pub fn is_satisfied(&self) -> bool {
        self.selected >= self.needed
    }

    pub fn deficit(&self) -> u32 {
        self.needed.saturating_sub(self.selected)
    }
}

/// Read-only view of the platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Full fleet listing.
    async fn fetch_inventory(&self) -> Result<RawInventory, CollaboratorError>;

    /// Ids of missions currently open.
    async fn list_missions(&self) -> Result<Vec<MissionId>, CollaboratorError>;

    /// Raw requirement fields of one mission.
    async fn extract_mission(&self, id: &MissionId) -> Result<RawMission, CollaboratorError>;
}

/// One mission page, owned by a single worker.
#[async_trait]
pub trait MissionPage: Send + Sync {
    /// Navigate to a mission. Clears any previous selection.
    async fn open_mission(&mut self, id: &MissionId) -> Result<(), CollaboratorError>;

    /// Travel time in seconds for each vehicle. Vehicles missing from the
    /// result have no known distance.
    async fn distances(
        &mut self,
        ids: &[VehicleId],
    ) -> Result<HashMap<VehicleId, u64>, CollaboratorError>;

    /// Tick a vehicle on the page. `false` when the page refuses it (not
    /// listed, already busy).
    async fn select_vehicle(&mut self, id: &VehicleId) -> Result<bool, CollaboratorError>;

    /// Current water bar.
    async fn water_status(&mut self) -> Result<WaterStatus, CollaboratorError>;

    /// Press the dispatch control. `false` when the control is missing.
    async fn dispatch(&mut self, mode: DispatchMode) -> Result<bool, CollaboratorError>;
}
