//! Requirement canonicalization.
//!
//! Mission pages describe requirements in loose, alias-laden text:
//! "Firetrucks", "SWAT Armoured Vehicles (Required)", "ARFF or Firetrucks".
//! The inventory is indexed by canonical type names, so every label goes
//! through the same pipeline before it is looked up:
//!
//! 1. strip parenthetical annotations
//! 2. case-fold
//! 3. collapse whitespace
//! 4. drop filler words ("required", "vehicle", "vehicles")
//! 5. drop a trailing plural "s" from the last word when that word is longer
//!    than three characters
//!
//! The normalized label is then resolved against the alias tables. Labels
//! that match nothing become their own canonical type, so unknown but
//! consistently named types still line up with inventory keys.
//!
//! Canonicalization is idempotent: feeding a canonical name back in returns
//! the same name.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tables::{RequirementCategory, Tables, SKIPPED_ROLES};

static PARENTHETICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([^)]*\)").expect("static regex")
});

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-z0-9\s]").expect("static regex")
});

const FILLER_WORDS: &[&str] = &["required", "vehicle", "vehicles"];

/// Canonical vehicle type, the key under which the inventory indexes vehicles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleType(String);

impl VehicleType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical personnel role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonnelRole(String);

impl PersonnelRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonnelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of canonicalizing a single label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    Vehicle(VehicleType),
    Personnel(PersonnelRole),
    Liquid(VehicleType),
    Ignored(String),
}

impl Canonical {
    /// The canonical name, whatever the category.
    pub fn name(&self) -> &str {
        match self {
            Canonical::Vehicle(t) | Canonical::Liquid(t) => t.as_str(),
            Canonical::Personnel(r) => r.as_str(),
            Canonical::Ignored(s) => s,
        }
    }
}

/// Normalize a vehicle/requirement label.
pub fn normalize_label(raw: &str) -> String {
    let stripped = PARENTHETICAL.replace_all(raw, " ");
    normalize_words(&stripped.to_lowercase())
}

/// Normalize a personnel role label.
///
/// Same pipeline as [`normalize_label`], with punctuation folded into spaces
/// so that "S.W.A.T. Personnel" and "swat personnel" meet.
pub fn normalize_role(raw: &str) -> String {
    let stripped = PARENTHETICAL.replace_all(raw, " ");
    let folded = stripped.to_lowercase();
    let alphanumeric = NON_ALPHANUMERIC.replace_all(&folded, " ");
    normalize_words(&alphanumeric)
}

fn normalize_words(folded: &str) -> String {
    let all: Vec<&str> = folded.split_whitespace().collect();
    let mut words: Vec<String> = all
        .iter()
        .filter(|w| !FILLER_WORDS.contains(w))
        .map(|w| (*w).to_string())
        .collect();

    // A label made only of filler words is kept as-is rather than emptied.
    if words.is_empty() {
        return all.join(" ");
    }

    if let Some(last) = words.last_mut() {
        if let Some(root) = singular_root(last) {
            *last = root;
        }
    }

    words.join(" ")
}

/// Singular form of a plural word, if it has one.
///
/// Words of three characters or fewer ("bus") are left alone. So are words
/// ending in "ss", which would otherwise lose another "s" on every pass.
fn singular_root(word: &str) -> Option<String> {
    let root = word.strip_suffix('s')?;
    if root.ends_with('s') {
        return None;
    }
    if word.chars().count() <= 3 {
        return None;
    }
    if FILLER_WORDS.contains(&root) {
        return None;
    }
    Some(root.to_string())
}

/// Turns raw labels into canonical types, roles and option lists.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    tables: Arc<Tables>,
}

impl Canonicalizer {
    pub fn new(tables: Arc<Tables>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Canonical vehicle type of a single label.
    pub fn vehicle_type(&self, raw: &str) -> VehicleType {
        self.tables.resolve_vehicle(raw)
    }

    /// Canonical personnel role of a single label.
    pub fn personnel_role(&self, raw: &str) -> PersonnelRole {
        self.tables.resolve_role(raw)
    }

    /// Split a multi-option label ("X or Y", "X, Y") into canonical options.
    ///
    /// Order is preserved and is the allocation priority. Options that
    /// collapse to the same canonical type appear once.
    pub fn vehicle_options(&self, raw: &str) -> Vec<VehicleType> {
        let lowered = raw.to_lowercase().replace(',', " or ");
        let mut options: Vec<VehicleType> = Vec::new();
        for part in lowered.split(" or ") {
            if part.trim().is_empty() {
                continue;
            }
            let option = self.vehicle_type(part);
            if !options.contains(&option) {
                options.push(option);
            }
        }
        options
    }

    /// Category of a requirement label.
    ///
    /// Lookup order on the normalized label:
    /// 1. the category table
    /// 2. the vehicle alias table (category of the canonical type, else vehicle)
    /// 3. the personnel alias table and the skipped roles
    ///
    /// Anything else is a vehicle requirement.
    pub fn category(&self, raw: &str) -> RequirementCategory {
        let normalized = normalize_label(raw);
        if let Some(category) = self.tables.categories.get(&normalized) {
            return category;
        }

        if let Some(canonical) = self.tables.vehicle_aliases.resolve(&normalized) {
            return self
                .tables
                .categories
                .get(&normalize_label(canonical))
                .unwrap_or(RequirementCategory::Vehicle);
        }

        let role = normalize_role(&normalized);
        if self.tables.personnel_aliases.resolve(&role).is_some()
            || SKIPPED_ROLES.contains(&role.as_str())
        {
            return RequirementCategory::Personnel;
        }

        RequirementCategory::Vehicle
    }

    /// Canonicalize a label according to its category.
    pub fn canonicalize(&self, raw: &str) -> Canonical {
        let normalized = normalize_label(raw);
        match self.category(raw) {
            RequirementCategory::Vehicle => Canonical::Vehicle(self.vehicle_type(&normalized)),
            RequirementCategory::Personnel => {
                Canonical::Personnel(self.personnel_role(&normalized))
            }
            RequirementCategory::Liquid => Canonical::Liquid(self.vehicle_type(&normalized)),
            RequirementCategory::Ignored => Canonical::Ignored(normalized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn canonicalizer() -> Canonicalizer {
        Canonicalizer::new(Arc::new(Tables::builtin().unwrap()))
    }

    #[rstest]
    #[case("Firetrucks", "firetruck")]
    #[case("Required Police Cars", "police car")]
    #[case("SWAT Armoured Vehicles", "swat armoured")]
    #[case("Heavy  Rescue\tVehicles (Required)", "heavy rescue")]
    #[case("bus", "bus")]
    #[case("Buses", "buse")]
    #[case("Glass", "glass")]
    #[case("Status", "statu")]
    #[case("Taxis", "taxi")]
    #[case("ARFFs", "arff")]
    #[case("Vehicles", "vehicles")]
    fn test_normalize_label(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_label(raw), expected);
    }

    #[rstest]
    #[case("S.W.A.T. Personnel", "s w a t personnel")]
    #[case("SWAT Personnel (In SWAT Vehicles)", "swat personnel")]
    #[case("Police Officers", "police officer")]
    fn test_normalize_role(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_role(raw), expected);
    }

    #[test]
    fn test_alias_resolution() {
        let c = canonicalizer();
        assert_eq!(c.vehicle_type("Patrol Cars").as_str(), "police car");
        assert_eq!(c.vehicle_type("ALS Ambulance").as_str(), "ambulance");
        assert_eq!(c.vehicle_type("Quint").as_str(), "platform truck");
        assert_eq!(c.personnel_role("S.W.A.T. Personnel").as_str(), "swat personnel");
    }

    #[test]
    fn test_unknown_label_is_its_own_type() {
        let c = canonicalizer();
        assert_eq!(c.vehicle_type("Hovercrafts").as_str(), "hovercraft");
        assert_eq!(c.vehicle_type("hovercraft").as_str(), "hovercraft");
    }

    #[test]
    fn test_vehicle_options_keep_order() {
        let c = canonicalizer();
        let options = c.vehicle_options("Firetrucks, Heavy Rescue Vehicles or Platform Trucks");
        let names: Vec<_> = options.iter().map(VehicleType::as_str).collect();
        assert_eq!(names, ["firetruck", "heavy rescue vehicle", "platform truck"]);
    }

    #[test]
    fn test_vehicle_options_dedupe_synonyms() {
        let c = canonicalizer();
        let options = c.vehicle_options("Patrol Cars or Police Cars");
        assert_eq!(options, vec![VehicleType::new("police car")]);
    }

    #[test]
    fn test_category() {
        let c = canonicalizer();
        assert_eq!(c.category("Gallons of Water"), RequirementCategory::Liquid);
        assert_eq!(c.category("SWAT Personnel"), RequirementCategory::Personnel);
        assert_eq!(c.category("Firetrucks"), RequirementCategory::Vehicle);
        assert_eq!(c.category("Something Unheard Of"), RequirementCategory::Vehicle);
        assert_eq!(c.category("Required Riot Police"), RequirementCategory::Personnel);
        assert_eq!(c.category("Required S.W.A.T. Personnel"), RequirementCategory::Personnel);
        assert_eq!(c.category("USAR"), RequirementCategory::Personnel);
        assert_eq!(c.category("SWAT Armoured Vehicles"), RequirementCategory::Vehicle);
    }

    #[test]
    fn test_canonicalize_by_category() {
        let c = canonicalizer();
        assert_eq!(
            c.canonicalize("Required Firetrucks"),
            Canonical::Vehicle(VehicleType::new("firetruck"))
        );
        assert_eq!(
            c.canonicalize("Required SWAT"),
            Canonical::Personnel(PersonnelRole::new("swat personnel"))
        );
        assert_eq!(
            c.canonicalize("Gallons of Water"),
            Canonical::Liquid(VehicleType::new("water"))
        );
        assert_eq!(
            c.canonicalize("Max. Patients"),
            Canonical::Ignored("max. patient".to_string())
        );
        assert_eq!(c.canonicalize("Sniper").name(), "sharpshooter");
    }

    fn label_strategy() -> impl Strategy<Value = String> {
        let token = prop::sample::select(vec![
            "Ambulance", "ambulances", "Fire", "trucks", "(Required)", "Vehicle", "vehicles",
            "required", "bus", "buses", "glass", "SWAT", "Armoured", "or", "s", "ss", "  ",
            "(x", ")", "Patrol", "Cars", "ARFFs", "status", "Water", "tanker", "Riot",
            "Police", "USAR", "Personnel", "S.W.A.T.", "Gallons", "of", "Taxis", "Max.",
            "Patients",
        ]);
        prop::collection::vec(token, 1..6).prop_map(|tokens| tokens.join(" "))
    }

    proptest! {
        #[test]
        fn test_vehicle_canonicalization_is_idempotent(raw in label_strategy()) {
            let c = canonicalizer();
            let once = c.vehicle_type(&raw);
            let twice = c.vehicle_type(once.as_str());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_role_canonicalization_is_idempotent(raw in label_strategy()) {
            let c = canonicalizer();
            let once = c.personnel_role(&raw);
            let twice = c.personnel_role(once.as_str());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_canonicalize_is_idempotent(raw in label_strategy()) {
            let c = canonicalizer();
            let once = c.canonicalize(&raw);
            let twice = c.canonicalize(once.name());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn test_normalize_is_idempotent(raw in "[ a-zA-Z()]{0,30}") {
            let once = normalize_label(&raw);
            prop_assert_eq!(normalize_label(&once), once.clone());
        }
    }
}
