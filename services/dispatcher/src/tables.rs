//! Static lookup tables: vehicle aliases, personnel aliases, personnel
//! capacities and requirement categories.
//!
//! Defaults are compiled into the binary from `data/*.json`. A data directory
//! may carry files with the same names; each one found replaces the matching
//! default wholesale. Tables are loaded once at startup and are read-only
//! afterwards.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::canonical::{normalize_label, normalize_role, PersonnelRole, VehicleType};

pub const VEHICLE_ALIASES_FILE: &str = "vehicle_aliases.json";
pub const PERSONNEL_ALIASES_FILE: &str = "personnel_aliases.json";
pub const PERSONNEL_CAPACITY_FILE: &str = "personnel_capacity.json";
pub const REQUIREMENT_CATEGORIES_FILE: &str = "requirement_categories.json";

const BUILTIN_VEHICLE_ALIASES: &str = include_str!("../data/vehicle_aliases.json");
const BUILTIN_PERSONNEL_ALIASES: &str = include_str!("../data/personnel_aliases.json");
const BUILTIN_PERSONNEL_CAPACITY: &str = include_str!("../data/personnel_capacity.json");
const BUILTIN_REQUIREMENT_CATEGORIES: &str = include_str!("../data/requirement_categories.json");

/// Personnel roles that no vehicle in the fleet can carry. They are neither
/// allocated nor reported as shortfall.
pub const SKIPPED_ROLES: &[&str] = &["technical rescuer", "usar", "sharpshooter"];

/// Errors raised while loading the static tables.
#[derive(Debug, Error)]
pub enum TablesError {
    #[error("failed to read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{file}: '{key}' maps to both '{first}' and '{second}'")]
    Conflict {
        file: String,
        key: String,
        first: String,
        second: String,
    },

    #[error("{file}: {message}")]
    Invalid { file: String, message: String },
}

/// Requirement category of a scraped requirement label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementCategory {
    Vehicle,
    Personnel,
    Liquid,
    Ignored,
}

/// Canonical name → synonyms, resolved through a normalized lookup.
///
/// Every canonical name and every synonym is normalized with the same
/// function used for incoming labels, so a canonical name always resolves to
/// itself.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    lookup: HashMap<String, String>,
}

impl AliasTable {
    fn from_entries(
        file: &str,
        entries: BTreeMap<String, Vec<String>>,
        normalize: fn(&str) -> String,
    ) -> Result<Self, TablesError> {
        let mut lookup: HashMap<String, String> = HashMap::new();

        let canonicals: Vec<(String, Vec<String>)> = entries
            .into_iter()
            .map(|(canonical, synonyms)| (collapse(&canonical), synonyms))
            .collect();

        // Canonical names are registered first so that they win over synonyms.
        for (canonical, _) in &canonicals {
            insert_unique(file, &mut lookup, normalize(canonical), canonical)?;
        }
        for (canonical, synonyms) in &canonicals {
            for synonym in synonyms {
                insert_unique(file, &mut lookup, normalize(synonym), canonical)?;
            }
        }

        Ok(Self { lookup })
    }

    /// Resolve an already-normalized label to its canonical name.
    pub fn resolve(&self, normalized: &str) -> Option<&str> {
        self.lookup.get(normalized).map(String::as_str)
    }

    /// Number of distinct normalized keys.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

fn insert_unique(
    file: &str,
    lookup: &mut HashMap<String, String>,
    key: String,
    canonical: &str,
) -> Result<(), TablesError> {
    match lookup.get(&key) {
        Some(existing) if existing != canonical => Err(TablesError::Conflict {
            file: file.to_string(),
            key,
            first: existing.clone(),
            second: canonical.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            lookup.insert(key, canonical.to_string());
            Ok(())
        }
    }
}

/// Lowercase and collapse whitespace, without any other normalization.
fn collapse(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One vehicle type able to carry a personnel role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleCapacity {
    pub vehicle_type: VehicleType,
    pub people: u32,
}

/// Personnel role → vehicle types (in preference order) and their capacity.
#[derive(Debug, Clone, Default)]
pub struct PersonnelCapacityMap {
    by_role: HashMap<PersonnelRole, Vec<VehicleCapacity>>,
}

impl PersonnelCapacityMap {
    /// Vehicles that carry this role, in declared order.
    pub fn vehicles_for(&self, role: &PersonnelRole) -> &[VehicleCapacity] {
        self.by_role.get(role).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Deserialize)]
struct RawCapacityEntry {
    role: String,
    vehicles: Vec<RawVehicleCapacity>,
}

#[derive(Debug, Deserialize)]
struct RawVehicleCapacity {
    vehicle_type: String,
    people: u32,
}

/// Normalized requirement label → category.
#[derive(Debug, Clone, Default)]
pub struct RequirementCategoryMap {
    by_label: HashMap<String, RequirementCategory>,
}

impl RequirementCategoryMap {
    /// Look up a normalized label.
    pub fn get(&self, normalized: &str) -> Option<RequirementCategory> {
        self.by_label.get(normalized).copied()
    }
}

/// All static tables the canonicalizer and allocator read.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub vehicle_aliases: AliasTable,
    pub personnel_aliases: AliasTable,
    pub capacities: PersonnelCapacityMap,
    pub categories: RequirementCategoryMap,
}

impl Tables {
    /// Tables compiled into the binary.
    pub fn builtin() -> Result<Self, TablesError> {
        Self::from_sources(
            BUILTIN_VEHICLE_ALIASES,
            BUILTIN_PERSONNEL_ALIASES,
            BUILTIN_PERSONNEL_CAPACITY,
            BUILTIN_REQUIREMENT_CATEGORIES,
        )
    }

    /// Builtin tables, with any file present in `dir` replacing its default.
    pub fn load(dir: &Path) -> Result<Self, TablesError> {
        let vehicle_aliases = read_override(dir, VEHICLE_ALIASES_FILE, BUILTIN_VEHICLE_ALIASES)?;
        let personnel_aliases =
            read_override(dir, PERSONNEL_ALIASES_FILE, BUILTIN_PERSONNEL_ALIASES)?;
        let capacity = read_override(dir, PERSONNEL_CAPACITY_FILE, BUILTIN_PERSONNEL_CAPACITY)?;
        let categories = read_override(
            dir,
            REQUIREMENT_CATEGORIES_FILE,
            BUILTIN_REQUIREMENT_CATEGORIES,
        )?;

        let tables = Self::from_sources(&vehicle_aliases, &personnel_aliases, &capacity, &categories)?;
        info!(
            vehicle_aliases = tables.vehicle_aliases.len(),
            personnel_aliases = tables.personnel_aliases.len(),
            "Static tables loaded"
        );
        Ok(tables)
    }

    /// Parse all four tables from their JSON text.
    pub fn from_sources(
        vehicle_aliases: &str,
        personnel_aliases: &str,
        capacity: &str,
        categories: &str,
    ) -> Result<Self, TablesError> {
        let vehicle_aliases = AliasTable::from_entries(
            VEHICLE_ALIASES_FILE,
            parse(VEHICLE_ALIASES_FILE, vehicle_aliases)?,
            normalize_label,
        )?;
        let personnel_aliases = AliasTable::from_entries(
            PERSONNEL_ALIASES_FILE,
            parse(PERSONNEL_ALIASES_FILE, personnel_aliases)?,
            normalize_role,
        )?;

        let mut tables = Self {
            vehicle_aliases,
            personnel_aliases,
            capacities: PersonnelCapacityMap::default(),
            categories: RequirementCategoryMap::default(),
        };

        // Capacity and category keys go through the alias tables parsed above
        // so that they line up with canonicalized requirements.
        let raw_capacity: Vec<RawCapacityEntry> = parse(PERSONNEL_CAPACITY_FILE, capacity)?;
        let mut by_role = HashMap::new();
        for entry in raw_capacity {
            let role = tables.resolve_role(&entry.role);
            let mut vehicles = Vec::with_capacity(entry.vehicles.len());
            for v in entry.vehicles {
                if v.people == 0 {
                    return Err(TablesError::Invalid {
                        file: PERSONNEL_CAPACITY_FILE.to_string(),
                        message: format!("'{}' carries zero '{}'", v.vehicle_type, role),
                    });
                }
                vehicles.push(VehicleCapacity {
                    vehicle_type: tables.resolve_vehicle(&v.vehicle_type),
                    people: v.people,
                });
            }
            by_role.insert(role, vehicles);
        }
        tables.capacities = PersonnelCapacityMap { by_role };

        let raw_categories: BTreeMap<String, RequirementCategory> =
            parse(REQUIREMENT_CATEGORIES_FILE, categories)?;
        tables.categories = RequirementCategoryMap {
            by_label: raw_categories
                .into_iter()
                .map(|(label, category)| (normalize_label(&label), category))
                .collect(),
        };

        debug!(
            roles = tables.capacities.by_role.len(),
            categories = tables.categories.by_label.len(),
            "Parsed static tables"
        );

        Ok(tables)
    }

    /// Canonical vehicle type for a label (open-world fallback on no match).
    pub fn resolve_vehicle(&self, raw: &str) -> VehicleType {
        let normalized = normalize_label(raw);
        match self.vehicle_aliases.resolve(&normalized) {
            Some(canonical) => VehicleType::new(canonical),
            None => VehicleType::new(normalized),
        }
    }

    /// Canonical personnel role for a label (open-world fallback on no match).
    pub fn resolve_role(&self, raw: &str) -> PersonnelRole {
        let normalized = normalize_role(raw);
        match self.personnel_aliases.resolve(&normalized) {
            Some(canonical) => PersonnelRole::new(canonical),
            None => PersonnelRole::new(normalized),
        }
    }
}

fn read_override(dir: &Path, file: &str, builtin: &str) -> Result<String, TablesError> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(builtin.to_string());
    }

    info!(path = %path.display(), "Using table override");
    fs::read_to_string(&path).map_err(|source| TablesError::Io {
        file: file.to_string(),
        source,
    })
}

fn parse<T: serde::de::DeserializeOwned>(file: &str, content: &str) -> Result<T, TablesError> {
    serde_json::from_str(content).map_err(|source| TablesError::Parse {
        file: file.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables_load() {
        let tables = Tables::builtin().unwrap();
        assert!(!tables.vehicle_aliases.is_empty());
        assert!(!tables.personnel_aliases.is_empty());
    }

    #[test]
    fn test_builtin_capacity_order() {
        let tables = Tables::builtin().unwrap();
        let swat = tables.capacities.vehicles_for(&PersonnelRole::new("swat personnel"));
        assert_eq!(swat.len(), 2);
        assert_eq!(swat[0].vehicle_type.as_str(), "swat armoured vehicle");
        assert_eq!(swat[0].people, 6);
        assert_eq!(swat[1].vehicle_type.as_str(), "swat suv");
    }

    #[test]
    fn test_canonical_resolves_to_itself() {
        let tables = Tables::builtin().unwrap();
        assert_eq!(
            tables.resolve_vehicle("swat armoured vehicle").as_str(),
            "swat armoured vehicle"
        );
        assert_eq!(tables.resolve_vehicle("SWAT Armored Vehicles").as_str(), "swat armoured vehicle");
    }

    #[test]
    fn test_conflicting_synonym_rejected() {
        let result = Tables::from_sources(
            r#"{"wrecker": ["tow truck"], "flatbed carrier": ["tow truck"]}"#,
            "{}",
            "[]",
            "{}",
        );
        assert!(matches!(result, Err(TablesError::Conflict { .. })));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = Tables::from_sources(
            "{}",
            "{}",
            r#"[{"role": "swat personnel", "vehicles": [{"vehicle_type": "swat suv", "people": 0}]}]"#,
            "{}",
        );
        assert!(matches!(result, Err(TablesError::Invalid { .. })));
    }

    #[test]
    fn test_override_file_replaces_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(VEHICLE_ALIASES_FILE),
            r#"{"ambulance": ["meat wagon"]}"#,
        )
        .unwrap();

        let tables = Tables::load(dir.path()).unwrap();
        assert_eq!(tables.resolve_vehicle("Meat Wagon").as_str(), "ambulance");
        // Builtin synonyms are gone with the override.
        assert_eq!(tables.resolve_vehicle("patrol car").as_str(), "patrol car");
    }

    #[test]
    fn test_category_lookup() {
        let tables = Tables::builtin().unwrap();
        assert_eq!(
            tables.categories.get("water"),
            Some(RequirementCategory::Liquid)
        );
        assert_eq!(tables.categories.get("firetruck"), None);
    }
}
