//! The fixed entity reference set and the filename ownership gate.
//!
//! Uploads are submitted *for* an entity; the filename must also *look like*
//! it belongs to that entity before any parsing happens. Detection runs over
//! all entities in canonical order so a mismatch can report which entity the
//! file probably belongs to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Entity {
    JanashakthiLimited,
    JanashakthiInsurance,
    FirstCapital,
    JanashakthiFinance,
}

impl Entity {
    /// Canonical enumeration order. Detection and seeding both follow it.
    pub const ALL: [Entity; 4] = [
        Entity::JanashakthiLimited,
        Entity::JanashakthiInsurance,
        Entity::FirstCapital,
        Entity::JanashakthiFinance,
    ];

    /// Stable id used in storage and upload requests.
    pub fn id(self) -> &'static str {
        match self {
            Entity::JanashakthiLimited => "janashakthi-limited",
            Entity::JanashakthiInsurance => "janashakthi-insurance",
            Entity::FirstCapital => "first-capital",
            Entity::JanashakthiFinance => "janashakthi-finance",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Entity::JanashakthiLimited => "Janashakthi Limited",
            Entity::JanashakthiInsurance => "Janashakthi Insurance PLC",
            Entity::FirstCapital => "First Capital Holdings PLC",
            Entity::JanashakthiFinance => "Janashakthi Finance PLC",
        }
    }

    pub fn short_code(self) -> &'static str {
        match self {
            Entity::JanashakthiLimited => "JXG",
            Entity::JanashakthiInsurance => "JINS",
            Entity::FirstCapital => "FCH",
            Entity::JanashakthiFinance => "JF",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Entity::JanashakthiLimited => "Parent Entity",
            Entity::JanashakthiInsurance => "Life Insurance",
            Entity::FirstCapital => "Investment Banking",
            Entity::JanashakthiFinance => "Non-Financial Banking",
        }
    }

    /// Lowercase substrings that mark a filename as belonging to this
    /// entity: full name, short code, and the id in hyphen/underscore form.
    fn filename_patterns(self) -> &'static [&'static str] {
        match self {
            Entity::JanashakthiLimited => &[
                "janashakthi limited",
                "janashakthi-limited",
                "janashakthi_limited",
                "jxg",
            ],
            Entity::JanashakthiInsurance => &[
                "janashakthi insurance",
                "janashakthi-insurance",
                "janashakthi_insurance",
                "jins",
                "insurance",
            ],
            Entity::FirstCapital => &[
                "first capital",
                "first-capital",
                "first_capital",
                "fch",
            ],
            Entity::JanashakthiFinance => &[
                "janashakthi finance",
                "janashakthi-finance",
                "janashakthi_finance",
                "jf",
            ],
        }
    }

    fn matches_filename(self, lowered: &str) -> bool {
        self.filename_patterns().iter().any(|p| lowered.contains(p))
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Entity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Entity::ALL
            .into_iter()
            .find(|e| e.id() == s)
            .ok_or_else(|| Error::UnknownEntity(s.to_string()))
    }
}

/// Outcome of the filename gate for one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    /// First entity (canonical order) with any pattern match, regardless of
    /// which entity was selected.
    pub detected: Option<Entity>,
}

/// Check whether `filename` looks like it belongs to `selected`.
///
/// The match is a case-insensitive substring test against the selected
/// entity's pattern set. Detection is reported independently so callers can
/// tell the operator which entity the file was probably meant for.
pub fn validate_filename(filename: &str, selected: Entity) -> ValidationReport {
    let lowered = filename.to_lowercase();
    ValidationReport {
        is_valid: selected.matches_filename(&lowered),
        detected: detect_entity(&lowered),
    }
}

fn detect_entity(lowered: &str) -> Option<Entity> {
    Entity::ALL.into_iter().find(|e| e.matches_filename(lowered))
}

// ============================================================================
// Tests
// ============================================================================
