//! Dispatch worker.
//!
//! Runs the dispatch cycle on a periodic interval:
//!
//! 1. make sure the inventory is current: adopt the snapshot file on start,
//!    refetch the fleet when the file is gone or the inventory is too old
//! 2. list open missions and release the locks of missions that are gone
//! 3. scrape raw missions, sharded across the pages, and build records
//! 4. persist the mission snapshot
//! 5. split the missions not already dispatched into contiguous chunks, one
//!    per page, and process the chunks concurrently: open, allocate, gate,
//!    dispatch or roll back
//!
//! A failure on one mission never aborts the cycle; the mission's claims are
//! released and it is picked up again on the next cycle if still listed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use mcd_id::MissionId;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::allocator::{Allocator, GateDecision};
use crate::canonical::Canonicalizer;
use crate::config::Config;
use crate::inventory::{InventoryHandle, VehicleInventory};
use crate::locks::VehicleLockTable;
use crate::persistence::{MissionSnapshot, SnapshotStore};
use crate::platform::{CollaboratorError, DispatchMode, MissionPage, Platform};
use crate::requirements::{MissionRequirementRecord, RequirementBuilder};
use crate::tables::Tables;

/// Cycle-level failures. Mission-level failures are counted, not raised.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("inventory refresh failed: {0}")]
    Inventory(#[source] CollaboratorError),

    #[error("mission listing failed: {0}")]
    MissionList(#[source] CollaboratorError),

    #[error("no mission pages available")]
    NoPages,
}

/// Statistics from one dispatch cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub missions_seen: usize,
    pub missions_dispatched: usize,
    pub missions_abandoned: usize,
    pub missions_failed: usize,
    pub vehicles_claimed: usize,
    pub locks_released: usize,
}

impl CycleStats {
    fn merge(&mut self, other: &CycleStats) {
        self.missions_seen += other.missions_seen;
        self.missions_dispatched += other.missions_dispatched;
        self.missions_abandoned += other.missions_abandoned;
        self.missions_failed += other.missions_failed;
        self.vehicles_claimed += other.vehicles_claimed;
        self.locks_released += other.locks_released;
    }
}

enum MissionResult {
    Dispatched { vehicles: usize },
    Abandoned { released: usize },
    NothingToSend,
}

/// Worker that runs the dispatch cycle.
pub struct DispatchWorker {
    platform: Arc<dyn Platform>,
    pages: Vec<Box<dyn MissionPage>>,
    builder: RequirementBuilder,
    allocator: Allocator,
    inventory: Arc<InventoryHandle>,
    refreshed_at: Option<Instant>,
    inventory_refresh: Duration,
    store: SnapshotStore,
    allocation_workers: usize,
    interval: Duration,
}

impl DispatchWorker {
    pub fn new(
        config: &Config,
        tables: Arc<Tables>,
        platform: Arc<dyn Platform>,
        pages: Vec<Box<dyn MissionPage>>,
        locks: Arc<VehicleLockTable>,
    ) -> Self {
        let canonicalizer = Canonicalizer::new(tables);
        Self {
            platform,
            pages,
            builder: RequirementBuilder::new(canonicalizer.clone()),
            allocator: Allocator::new(canonicalizer, locks, config.policy),
            inventory: Arc::new(InventoryHandle::default()),
            refreshed_at: None,
            inventory_refresh: config.inventory_refresh,
            store: SnapshotStore::new(&config.data_dir),
            allocation_workers: config.allocation_workers(),
            interval: config.mission_interval,
        }
    }

    pub fn locks(&self) -> &Arc<VehicleLockTable> {
        self.allocator.locks()
    }

    pub fn inventory(&self) -> &Arc<InventoryHandle> {
        &self.inventory
    }

    /// Run the dispatch cycle until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            pages = self.pages.len(),
            allocation_workers = self.allocation_workers,
            "Starting dispatch worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Dispatch cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Dispatch worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single dispatch cycle.
    #[instrument(skip(self))]
    pub async fn run_cycle(&mut self) -> Result<CycleStats, DispatchError> {
        if self.pages.is_empty() {
            return Err(DispatchError::NoPages);
        }

        let inventory = self.ensure_inventory().await?;

        let ids = self
            .platform
            .list_missions()
            .await
            .map_err(DispatchError::MissionList)?;
        let mut stats = CycleStats {
            missions_seen: ids.len(),
            ..Default::default()
        };

        stats.locks_released += self.release_vanished(&ids);

        let (records, failed) = self.scrape(&ids).await;
        stats.missions_failed += failed;

        let snapshot = MissionSnapshot::new(records.clone());
        if let Err(e) = self.store.save_missions(&snapshot) {
            warn!(error = %e, "Failed to persist mission snapshot");
        }

        // Missions still holding claims were dispatched on an earlier cycle;
        // their vehicles stay locked until the mission leaves the list.
        let in_progress = self.allocator.locks().missions();
        let missions: Vec<MissionRequirementRecord> = ids
            .iter()
            .filter(|id| {
                let held = in_progress.contains(*id);
                if held {
                    debug!(mission_id = %id, "Mission already dispatched");
                }
                !held
            })
            .filter_map(|id| records.get(id).cloned())
            .collect();

        let workers = self.allocation_workers.clamp(1, self.pages.len());
        let chunk_size = missions.len().div_ceil(workers).max(1);
        let allocator = &self.allocator;
        let mode = allocator.policy().mode;

        let chunks = self
            .pages
            .iter_mut()
            .zip(missions.chunks(chunk_size))
            .enumerate()
            .map(|(i, (page, chunk))| {
                process_chunk(i + 1, page.as_mut(), chunk, &inventory, allocator, mode)
            });

        for chunk_stats in join_all(chunks).await {
            stats.merge(&chunk_stats);
        }

        info!(
            missions_seen = stats.missions_seen,
            missions_dispatched = stats.missions_dispatched,
            missions_abandoned = stats.missions_abandoned,
            missions_failed = stats.missions_failed,
            vehicles_claimed = stats.vehicles_claimed,
            locks_released = stats.locks_released,
            "Dispatch cycle complete"
        );

        Ok(stats)
    }

    /// Replace the inventory with a fresh fleet listing and persist it.
    pub async fn refresh_inventory(&mut self) -> Result<Arc<VehicleInventory>, DispatchError> {
        let raw = self
            .platform
            .fetch_inventory()
            .await
            .map_err(DispatchError::Inventory)?;
        let inventory = VehicleInventory::from_platform(raw, self.builder.canonicalizer());

        if let Err(e) = self.store.save_inventory(&inventory) {
            warn!(error = %e, "Failed to persist vehicle snapshot");
        }

        self.inventory.replace(inventory);
        self.refreshed_at = Some(Instant::now());
        Ok(self.inventory.load())
    }

    /// Current inventory, refetched when the vehicle snapshot file is gone
    /// or the last fetch is older than the refresh period. On the first
    /// cycle an existing snapshot file is adopted instead of fetching.
    async fn ensure_inventory(&mut self) -> Result<Arc<VehicleInventory>, DispatchError> {
        let snapshot_present = self.store.vehicle_path().exists();

        match self.refreshed_at {
            Some(at) if snapshot_present && at.elapsed() < self.inventory_refresh => {
                return Ok(self.inventory.load());
            }
            None if snapshot_present => match self.store.load_inventory() {
                Ok(Some(inventory)) => {
                    self.inventory.replace(inventory);
                    self.refreshed_at = Some(Instant::now());
                    return Ok(self.inventory.load());
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Unreadable vehicle snapshot, fetching inventory"),
            },
            None => info!("No vehicle snapshot, fetching inventory"),
            Some(_) if !snapshot_present => info!("Vehicle snapshot removed, fetching inventory"),
            Some(_) => debug!("Inventory refresh due"),
        }

        match self.refresh_inventory().await {
            Ok(inventory) => Ok(inventory),
            Err(e) if self.refreshed_at.is_some() => {
                warn!(error = %e, "Inventory refresh failed, keeping previous inventory");
                Ok(self.inventory.load())
            }
            Err(e) => Err(e),
        }
    }

    /// Free the vehicles of missions that are no longer listed.
    fn release_vanished(&self, listed: &[MissionId]) -> usize {
        let listed: BTreeSet<&MissionId> = listed.iter().collect();
        let locks = self.allocator.locks();

        locks
            .missions()
            .iter()
            .filter(|mission| !listed.contains(mission))
            .map(|mission| {
                debug!(mission_id = %mission, "Mission no longer listed");
                locks.release_all(mission)
            })
            .sum()
    }

    /// Extract and build records, sharded across as many concurrent
    /// scrapers as there are pages. Returns the records and the number of
    /// missions that could not be extracted.
    async fn scrape(
        &self,
        ids: &[MissionId],
    ) -> (BTreeMap<MissionId, MissionRequirementRecord>, usize) {
        let shards = self.pages.len().clamp(1, ids.len().max(1));
        let platform = &self.platform;
        let builder = &self.builder;

        let scrapers = (0..shards).map(|shard| async move {
            let mut records = Vec::new();
            let mut failed = 0;
            for id in ids.iter().skip(shard).step_by(shards) {
                match platform.extract_mission(id).await {
                    Ok(raw) => records.push(builder.build(id.clone(), &raw)),
                    Err(e) => {
                        warn!(mission_id = %id, error = %e, "Failed to extract mission");
                        failed += 1;
                    }
                }
            }
            (records, failed)
        });

        let mut records = BTreeMap::new();
        let mut failed = 0;
        for (shard_records, shard_failed) in join_all(scrapers).await {
            failed += shard_failed;
            records.extend(
                shard_records
                    .into_iter()
                    .map(|record| (record.mission_id.clone(), record)),
            );
        }
        (records, failed)
    }
}

/// Process one chunk of missions sequentially on one page.
#[instrument(skip_all, fields(worker = worker_id, missions = chunk.len()))]
async fn process_chunk(
    worker_id: usize,
    page: &mut dyn MissionPage,
    chunk: &[MissionRequirementRecord],
    inventory: &VehicleInventory,
    allocator: &Allocator,
    mode: DispatchMode,
) -> CycleStats {
    let mut stats = CycleStats::default();

    for record in chunk {
        match process_mission(page, record, inventory, allocator, mode).await {
            Ok(MissionResult::Dispatched { vehicles }) => {
                stats.missions_dispatched += 1;
                stats.vehicles_claimed += vehicles;
            }
            Ok(MissionResult::Abandoned { released }) => {
                stats.missions_abandoned += 1;
                stats.locks_released += released;
            }
            Ok(MissionResult::NothingToSend) => {}
            Err(e) => {
                warn!(mission_id = %record.mission_id, error = %e, "Failed to process mission");
                stats.missions_failed += 1;
                stats.locks_released += allocator.locks().release_all(&record.mission_id);
            }
        }
    }

    stats
}

async fn process_mission(
    page: &mut dyn MissionPage,
    record: &MissionRequirementRecord,
    inventory: &VehicleInventory,
    allocator: &Allocator,
    mode: DispatchMode,
) -> Result<MissionResult, CollaboratorError> {
    page.open_mission(&record.mission_id).await?;

    let outcome = allocator.allocate(record, inventory, page).await?;
    if let GateDecision::Abandon { released } = allocator.gate(&record.mission_id, &outcome) {
        return Ok(MissionResult::Abandoned { released });
    }

    if outcome.claimed.is_empty() {
        debug!(mission_id = %record.mission_id, "Nothing to send");
        return Ok(MissionResult::NothingToSend);
    }

    if !press_dispatch(page, mode).await? {
        return Err(CollaboratorError::Page("dispatch control missing".to_string()));
    }

    info!(
        mission_id = %record.mission_id,
        name = %record.name,
        credits = record.credits,
        vehicles = outcome.claimed.len(),
        "Dispatched mission"
    );
    Ok(MissionResult::Dispatched {
        vehicles: outcome.claimed.len(),
    })
}

/// Press the configured dispatch control. Alliance mode falls back to the
/// default control when the page has no alliance button.
async fn press_dispatch(
    page: &mut dyn MissionPage,
    mode: DispatchMode,
) -> Result<bool, CollaboratorError> {
    if mode == DispatchMode::Alliance {
        if page.dispatch(DispatchMode::Alliance).await? {
            return Ok(true);
        }
        debug!("Alliance dispatch unavailable, using default");
    }
    page.dispatch(DispatchMode::Default).await
}
