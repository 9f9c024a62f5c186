//! Typed ID definitions for dispatcher resources.

use crate::define_id;

// =============================================================================
// Fleet
// =============================================================================

define_id!(VehicleId, "vehicle id");

// =============================================================================
// Missions
// =============================================================================

define_id!(MissionId, "mission id");

// =============================================================================
// Tests
// =============================================================================
