//! Snapshot persistence.
//!
//! Two JSON files in the data directory:
//! - `vehicle_data.json`: canonical type → vehicle ids
//! - `mission_data.json`: requirement records of the last scrape
//!
//! Both are written to a temp file and renamed into place, so a reader never
//! sees a half-written snapshot. They are operator-facing, not an internal
//! protocol: the dispatcher only reads the vehicle snapshot back, to skip a
//! full fleet refresh on startup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mcd_id::MissionId;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::inventory::VehicleInventory;
use crate::requirements::MissionRequirementRecord;

pub const VEHICLE_SNAPSHOT_FILE: &str = "vehicle_data.json";
pub const MISSION_SNAPSHOT_FILE: &str = "mission_data.json";

/// Mission snapshot format version.
const MISSION_SNAPSHOT_VERSION: u32 = 1;

/// Persisted mission requirement records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSnapshot {
    pub version: u32,
    pub captured_at: DateTime<Utc>,
    pub missions: BTreeMap<MissionId, MissionRequirementRecord>,
}

impl MissionSnapshot {
    pub fn new(missions: BTreeMap<MissionId, MissionRequirementRecord>) -> Self {
        Self {
            version: MISSION_SNAPSHOT_VERSION,
            captured_at: Utc::now(),
            missions,
        }
    }
}

/// Reads and writes snapshots in a data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vehicle_path(&self) -> PathBuf {
        self.dir.join(VEHICLE_SNAPSHOT_FILE)
    }

    pub fn mission_path(&self) -> PathBuf {
        self.dir.join(MISSION_SNAPSHOT_FILE)
    }

    /// Load the vehicle snapshot. `None` if there is none yet.
    pub fn load_inventory(&self) -> Result<Option<VehicleInventory>> {
        let inventory: Option<VehicleInventory> = read_json(&self.vehicle_path())?;
        if let Some(inventory) = &inventory {
            info!(
                path = %self.vehicle_path().display(),
                vehicles = inventory.vehicle_count(),
                "Loaded vehicle snapshot"
            );
        }
        Ok(inventory)
    }

    pub fn save_inventory(&self, inventory: &VehicleInventory) -> Result<()> {
        write_json(&self.vehicle_path(), inventory)?;
        debug!(vehicles = inventory.vehicle_count(), "Saved vehicle snapshot");
        Ok(())
    }

    /// Load the mission snapshot.
    ///
    /// A snapshot of another format version is treated as absent.
    pub fn load_missions(&self) -> Result<Option<MissionSnapshot>> {
        let Some(snapshot) = read_json::<MissionSnapshot>(&self.mission_path())? else {
            return Ok(None);
        };

        if snapshot.version != MISSION_SNAPSHOT_VERSION {
            warn!(
                file_version = snapshot.version,
                current_version = MISSION_SNAPSHOT_VERSION,
                "Mission snapshot version mismatch, ignoring"
            );
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    pub fn save_missions(&self, snapshot: &MissionSnapshot) -> Result<()> {
        write_json(&self.mission_path(), snapshot)?;
        debug!(missions = snapshot.missions.len(), "Saved mission snapshot");
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        debug!(path = %path.display(), "No snapshot file");
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;
    Ok(Some(value))
}

/// Write-to-temp + rename.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("tmp");
    let content = serde_json::to_string_pretty(value).context("Failed to serialize snapshot")?;

    fs::write(&tmp_path, &content)
        .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed to rename {} -> {}",
            tmp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
