//! # mcd-id
//!
//! Typed identifiers for the mission dispatcher.
//!
//! The game assigns opaque identifiers to vehicles and missions. They are
//! usually numeric, but nothing in the dispatcher relies on that, so both
//! are kept as strings behind distinct types:
//!
//! - `VehicleId`: one vehicle in the player's fleet (e.g. `18234771`)
//! - `MissionId`: one open incident on the mission list (e.g. `3318275021`)
//!
//! Keeping them apart makes it impossible to record a mission in the place
//! where a vehicle belongs, which matters for the lock table where both
//! appear side by side.
//!
//! ## Format
//!
//! - Surrounding whitespace is trimmed on parse
//! - Empty input and embedded whitespace are rejected
//! - JSON accepts both `"123"` and `123`, and always writes a string

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
