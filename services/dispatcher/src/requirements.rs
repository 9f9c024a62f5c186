//! Mission requirement model and builder.
//!
//! The scraper hands over raw text per mission ([`RawMission`]). The builder
//! runs it through the canonicalizer and the derived rules and produces one
//! [`MissionRequirementRecord`]. A record is immutable once allocation starts
//! and is discarded after the dispatch attempt.

use std::sync::LazyLock;

use mcd_id::MissionId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::canonical::{normalize_label, Canonical, Canonicalizer, PersonnelRole, VehicleType};

pub const AMBULANCE: &str = "ambulance";
pub const EMS_CHIEF: &str = "ems chief";
pub const EMS_MOBILE_COMMAND_UNIT: &str = "ems mobile command unit";
pub const SWAT_PERSONNEL: &str = "swat personnel";
pub const SWAT_ARMOURED_VEHICLE: &str = "swat armoured vehicle";
pub const POLICE_CAR: &str = "police car";
pub const PRISONER_TRANSPORT_VAN: &str = "prisoner transport van";
pub const WATER: &str = "water";

/// SWAT personnel carried by one armoured vehicle.
const SWAT_PER_ARMOURED_VEHICLE: u32 = 6;
/// Prisoners carried by one transport van.
const PRISONERS_PER_VAN: u32 = 4;

static BREAK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("static regex"));
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static ENTRY_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,\n]+").expect("static regex"));
static PERSONNEL_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*[xX]?\s*(.+)$").expect("static regex"));
static MISSING_ALERT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+(.+)").expect("static regex"));

// =============================================================================
// Raw input
// =============================================================================

/// One row of the mission help table, e.g. ("Required Firetrucks", "3").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequirementRow {
    pub label: String,
    pub count: String,
}

impl RawRequirementRow {
    pub fn new(label: impl Into<String>, count: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            count: count.into(),
        }
    }
}

/// Prisoners waiting at a mission and transport units already there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrisonerTransport {
    pub prisoners: u32,
    pub transport_on_scene: u32,
}

/// Fields scraped from one mission page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMission {
    pub name: String,
    pub credits: u32,
    pub requirement_rows: Vec<RawRequirementRow>,
    /// "Required personnel" cell, possibly still HTML.
    pub personnel_text: Option<String>,
    /// Texts of the "missing personnel" alerts shown on a running mission.
    pub missing_personnel: Vec<String>,
    pub patients: u32,
    pub crashed_cars: u32,
    pub prisoners: Option<PrisonerTransport>,
}

// =============================================================================
// Requirement model
// =============================================================================

/// Vehicles of one of several types, tried left to right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRequirement {
    pub options: Vec<VehicleType>,
    pub count: u32,
}

impl VehicleRequirement {
    pub fn new(options: Vec<VehicleType>, count: u32) -> Self {
        Self { options, count }
    }

    /// Option names joined for operator-facing reports.
    pub fn label(&self) -> String {
        self.options
            .iter()
            .map(VehicleType::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn accepts(&self, vehicle_type: &VehicleType) -> bool {
        self.options.contains(vehicle_type)
    }
}

/// Headcount of one role, resolved to vehicles at allocation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonnelRequirement {
    pub role: PersonnelRole,
    pub count: u32,
}

/// Liquid (water) demand. The amount is informational; allocation follows
/// the live selected/needed signal of the mission page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidRequirement {
    pub liquid: VehicleType,
    pub amount: u32,
}

/// Everything the allocator needs to know about one mission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionRequirementRecord {
    pub mission_id: MissionId,
    pub name: String,
    #[serde(default)]
    pub credits: u32,
    #[serde(default)]
    pub vehicles: Vec<VehicleRequirement>,
    #[serde(default)]
    pub personnel: Vec<PersonnelRequirement>,
    #[serde(default)]
    pub liquid: Vec<LiquidRequirement>,
    #[serde(default)]
    pub patients: u32,
    #[serde(default)]
    pub crashed_cars: u32,
}

impl MissionRequirementRecord {
    pub fn new(mission_id: MissionId, name: impl Into<String>) -> Self {
        Self {
            mission_id,
            name: name.into(),
            credits: 0,
            vehicles: Vec::new(),
            personnel: Vec::new(),
            liquid: Vec::new(),
            patients: 0,
            crashed_cars: 0,
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds requirement records from raw scraped fields.
#[derive(Debug, Clone)]
pub struct RequirementBuilder {
    canonicalizer: Canonicalizer,
}

impl RequirementBuilder {
    pub fn new(canonicalizer: Canonicalizer) -> Self {
        Self { canonicalizer }
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    /// Build the record for one mission.
    pub fn build(&self, mission_id: MissionId, raw: &RawMission) -> MissionRequirementRecord {
        let mut record = MissionRequirementRecord::new(mission_id, raw.name.trim());
        record.credits = raw.credits;

        // A running mission that only lacks personnel lists exactly what is
        // missing; nothing else on the page applies.
        if !raw.missing_personnel.is_empty() {
            record.personnel = self.missing_personnel(&raw.missing_personnel);
            debug!(
                mission_id = %record.mission_id,
                roles = record.personnel.len(),
                "Mission only lacks personnel"
            );
            return record;
        }

        if let Some(transport) = raw.prisoners {
            record.vehicles = self.prisoner_transport(transport).into_iter().collect();
            return record;
        }

        for row in &raw.requirement_rows {
            self.add_row(&mut record, row);
        }

        // The personnel block replaces personnel listed in the table rows.
        if let Some(text) = &raw.personnel_text {
            record.personnel = self.personnel_entries(text);
        }

        self.reduce_swat_vehicles(&mut record);

        record.patients = raw.patients;
        record.crashed_cars = raw.crashed_cars;
        self.add_patient_vehicles(&mut record);

        record
    }

    fn add_row(&self, record: &mut MissionRequirementRecord, row: &RawRequirementRow) {
        let normalized = normalize_label(&row.label);
        if normalized.contains("probability") {
            return;
        }

        let Some(count) = parse_count(&row.count) else {
            warn!(
                mission_id = %record.mission_id,
                label = %row.label,
                count = %row.count,
                "Skipping requirement with non-numeric count"
            );
            return;
        };

        match self.canonicalizer.canonicalize(&row.label) {
            Canonical::Vehicle(_) => {
                let options = self.canonicalizer.vehicle_options(&row.label);
                if options.is_empty() {
                    return;
                }
                let water = self.canonicalizer.vehicle_type(WATER);
                if options.contains(&water) {
                    record.liquid.push(LiquidRequirement {
                        liquid: water,
                        amount: count,
                    });
                } else {
                    record.vehicles.push(VehicleRequirement::new(options, count));
                }
            }
            Canonical::Liquid(liquid) => {
                record.liquid.push(LiquidRequirement {
                    liquid,
                    amount: count,
                });
            }
            Canonical::Personnel(role) => {
                record.personnel.push(PersonnelRequirement { role, count });
            }
            Canonical::Ignored(label) => {
                debug!(label = %label, "Requirement row ignored");
            }
        }
    }

    /// Parse a "required personnel" block: entries like "6 x SWAT Personnel"
    /// separated by commas or line breaks.
    pub fn personnel_entries(&self, text: &str) -> Vec<PersonnelRequirement> {
        let text = BREAK_TAG.replace_all(text, "\n");
        let text = ANY_TAG.replace_all(&text, "");
        let text = text.replace('\u{a0}', " ");

        ENTRY_SEPARATOR
            .split(&text)
            .filter_map(|entry| {
                let caps = PERSONNEL_ENTRY.captures(entry.trim())?;
                let count = caps[1].parse().ok()?;
                Some(PersonnelRequirement {
                    role: self.canonicalizer.personnel_role(&caps[2]),
                    count,
                })
            })
            .collect()
    }

    fn missing_personnel(&self, alerts: &[String]) -> Vec<PersonnelRequirement> {
        alerts
            .iter()
            .filter_map(|alert| {
                let caps = MISSING_ALERT.captures(alert.trim())?;
                let count = caps[1].parse().ok()?;
                Some(PersonnelRequirement {
                    role: self.canonicalizer.personnel_role(&caps[2]),
                    count,
                })
            })
            .collect()
    }

    /// Every six SWAT personnel needed take one armoured vehicle off the
    /// vehicle list, since the armoured vehicle sent for them counts there.
    fn reduce_swat_vehicles(&self, record: &mut MissionRequirementRecord) {
        let swat = self.canonicalizer.personnel_role(SWAT_PERSONNEL);
        let armoured = self.canonicalizer.vehicle_type(SWAT_ARMOURED_VEHICLE);

        let reduction: u32 = record
            .personnel
            .iter()
            .filter(|p| p.role == swat)
            .map(|p| p.count / SWAT_PER_ARMOURED_VEHICLE)
            .sum();
        if reduction == 0 {
            return;
        }

        for requirement in record.vehicles.iter_mut().filter(|v| v.accepts(&armoured)) {
            requirement.count = requirement.count.saturating_sub(reduction);
        }
        record
            .vehicles
            .retain(|v| !(v.accepts(&armoured) && v.count == 0));

        debug!(
            mission_id = %record.mission_id,
            reduction,
            "Reduced armoured vehicle requirement for SWAT personnel"
        );
    }

    fn add_patient_vehicles(&self, record: &mut MissionRequirementRecord) {
        let patients = record.patients;
        if patients == 0 {
            return;
        }

        let single = |name: &str, count: u32| {
            VehicleRequirement::new(vec![self.canonicalizer.vehicle_type(name)], count)
        };

        record.vehicles.push(single(AMBULANCE, patients));
        if patients >= 10 {
            record.vehicles.push(single(EMS_CHIEF, 1));
        }
        if patients >= 20 {
            record.vehicles.push(single(EMS_MOBILE_COMMAND_UNIT, 1));
        }
    }

    /// Vehicles needed to carry prisoners not already covered on scene.
    pub fn prisoner_transport(&self, transport: PrisonerTransport) -> Option<VehicleRequirement> {
        let remaining = transport
            .prisoners
            .saturating_sub(transport.transport_on_scene);

        match remaining {
            0 => None,
            1..PRISONERS_PER_VAN => Some(VehicleRequirement::new(
                vec![self.canonicalizer.vehicle_type(POLICE_CAR)],
                remaining,
            )),
            _ => Some(VehicleRequirement::new(
                vec![self.canonicalizer.vehicle_type(PRISONER_TRANSPORT_VAN)],
                remaining.div_ceil(PRISONERS_PER_VAN),
            )),
        }
    }
}

fn parse_count(raw: &str) -> Option<u32> {
    raw.trim().replace(',', "").parse().ok()
}
