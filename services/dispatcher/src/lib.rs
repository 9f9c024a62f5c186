//! Mission dispatcher library.
//!
//! Turns scraped mission requirement text into canonical requirement
//! records and allocates vehicles to missions, many missions at a time,
//! without ever sending the same vehicle to two of them.
//!
//! ## Architecture
//!
//! ```text
//! Platform ──raw missions──▶ RequirementBuilder ──records──▶ Allocator ──▶ MissionPage
//!    │                              │                           │
//!    └──fleet──▶ VehicleInventory   └── Canonicalizer/Tables    └── VehicleLockTable
//! ```
//!
//! ## Modules
//!
//! - `canonical`: label normalization and alias resolution
//! - `tables`: alias, capacity and category tables
//! - `requirements`: requirement model and record builder
//! - `inventory`: fleet snapshot behind an atomically swapped reference
//! - `locks`: the shared vehicle → mission lock table
//! - `allocator`: claims, shortfalls and the dispatch gate
//! - `platform`: collaborator traits; `mock` has in-memory implementations
//! - `persistence`: vehicle and mission snapshots on disk
//! - `worker`: the periodic dispatch cycle

pub mod allocator;
pub mod canonical;
pub mod config;
pub mod inventory;
pub mod locks;
pub mod mock;
pub mod persistence;
pub mod platform;
pub mod requirements;
pub mod tables;
pub mod worker;

pub use allocator::{format_distance, AllocationOutcome, Allocator, GateDecision, Shortfall};
pub use canonical::{Canonical, Canonicalizer, PersonnelRole, VehicleType};
pub use config::{Config, DispatchPolicy, Region};
pub use inventory::{InventoryHandle, VehicleInventory};
pub use locks::VehicleLockTable;
pub use platform::{CollaboratorError, DispatchMode, MissionPage, Platform, WaterStatus};
pub use requirements::{MissionRequirementRecord, RawMission, RequirementBuilder};
pub use tables::Tables;
pub use worker::{CycleStats, DispatchError, DispatchWorker};
