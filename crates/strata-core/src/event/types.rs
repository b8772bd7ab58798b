//! Closed classification enums for the event model.
//!
//! Epistemic types and reference kinds are exhaustive by construction:
//! a value that parses is a value the rules can reason about, and match
//! arms cover every case at compile time. Categories keep a closed set
//! of well-known tags plus a forward-compatible carrier for tags this
//! version has never seen.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// EpistemicType
// ---------------------------------------------------------------------------

/// The three epistemic standings an event can have.
///
/// The set is closed, exhaustive, and mutually exclusive: every event is
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpistemicType {
    /// Raw, externally-sourced fact. Never derivable from interpretation.
    Given,
    /// An interpretation or claim, grounded in given facts and revisable
    /// via supersession.
    Meant,
    /// A computed result with an explicit derivation.
    DerivedValue,
}

/// Error returned when parsing an unknown epistemic type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEpistemicType {
    /// The unrecognised input string.
    pub raw: String,
}

impl fmt::Display for UnknownEpistemicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown epistemic type '{}': expected one of given, meant, derived_value",
            self.raw
        )
    }
}

impl std::error::Error for UnknownEpistemicType {}

impl EpistemicType {
    /// All epistemic types in catalog order.
    pub const ALL: [Self; 3] = [Self::Given, Self::Meant, Self::DerivedValue];

    /// Canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Given => "given",
            Self::Meant => "meant",
            Self::DerivedValue => "derived_value",
        }
    }

    /// Whether events of this type must carry grounding.
    #[must_use]
    pub const fn requires_grounding(self) -> bool {
        matches!(self, Self::Meant | Self::DerivedValue)
    }
}

impl fmt::Display for EpistemicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpistemicType {
    type Err = UnknownEpistemicType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "given" => Ok(Self::Given),
            "meant" => Ok(Self::Meant),
            "derived_value" => Ok(Self::DerivedValue),
            _ => Err(UnknownEpistemicType { raw: s.to_string() }),
        }
    }
}

impl Serialize for EpistemicType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EpistemicType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ReferenceKind
// ---------------------------------------------------------------------------

/// How a grounding reference relates the citing event to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// Cites something outside the log (a file, a sensor, a URL).
    External,
    /// Cites the shape or position of other data.
    Structural,
    /// Cites the meaning of another event.
    Semantic,
    /// Cites an input to a computation.
    Computational,
    /// Cites another claim's standing.
    Epistemic,
}

impl ReferenceKind {
    /// All reference kinds in catalog order.
    pub const ALL: [Self; 5] = [
        Self::External,
        Self::Structural,
        Self::Semantic,
        Self::Computational,
        Self::Epistemic,
    ];

    /// Canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Structural => "structural",
            Self::Semantic => "semantic",
            Self::Computational => "computational",
            Self::Epistemic => "epistemic",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SupersessionKind
// ---------------------------------------------------------------------------

/// Why a new event replaces another's standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupersessionKind {
    /// The old interpretation was wrong.
    Correction,
    /// The old interpretation was incomplete.
    Refinement,
    /// The old interpretation is withdrawn without a replacement claim.
    Retraction,
}

impl SupersessionKind {
    /// Canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Correction => "correction",
            Self::Refinement => "refinement",
            Self::Retraction => "retraction",
        }
    }
}

impl fmt::Display for SupersessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Free-form classification tag with well-known values.
///
/// The known set is what this crate itself produces; tags written by
/// other producers are preserved verbatim in [`Category::Other`] so a
/// round-trip through the store never loses them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    /// Imported or captured source data.
    RawData,
    /// A human or machine interpretation.
    Interpretation,
    /// Output of a computation.
    ComputedValue,
    /// Durable record of a failed sync attempt.
    SyncFailure,
    /// A deletion marker for another event.
    Tombstone,
    /// Any tag this version does not know.
    Other(String),
}

impl Category {
    /// Canonical string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::RawData => "raw_data",
            Self::Interpretation => "interpretation",
            Self::ComputedValue => "computed_value",
            Self::SyncFailure => "sync_failure",
            Self::Tombstone => "tombstone",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s {
            "raw_data" => Self::RawData,
            "interpretation" => Self::Interpretation,
            "computed_value" => Self::ComputedValue,
            "sync_failure" => Self::SyncFailure,
            "tombstone" => Self::Tombstone,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epistemic_display_fromstr_roundtrip() {
        for et in EpistemicType::ALL {
            let parsed: EpistemicType = et.as_str().parse().expect("should parse");
            assert_eq!(parsed, et);
        }
    }

    #[test]
    fn epistemic_rejects_unknown() {
        let err = "believed".parse::<EpistemicType>().unwrap_err();
        assert_eq!(err.raw, "believed");
        assert!(err.to_string().contains("expected one of"));
    }

    #[test]
    fn epistemic_serde_uses_snake_strings() {
        let json = serde_json::to_string(&EpistemicType::DerivedValue).expect("serialize");
        assert_eq!(json, "\"derived_value\"");
        let back: EpistemicType = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, EpistemicType::DerivedValue);
    }

    #[test]
    fn grounding_requirement_per_type() {
        assert!(!EpistemicType::Given.requires_grounding());
        assert!(EpistemicType::Meant.requires_grounding());
        assert!(EpistemicType::DerivedValue.requires_grounding());
    }

    #[test]
    fn reference_kind_serde_roundtrip() {
        for kind in ReferenceKind::ALL {
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: ReferenceKind = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn category_known_tags_roundtrip() {
        for tag in ["raw_data", "interpretation", "computed_value", "sync_failure", "tombstone"] {
            let cat = Category::from(tag);
            assert!(!matches!(cat, Category::Other(_)), "{tag} should be known");
            assert_eq!(cat.as_str(), tag);
        }
    }

    #[test]
    fn category_preserves_unknown_tags() {
        let cat = Category::from("spreadsheet_cell");
        assert_eq!(cat, Category::Other("spreadsheet_cell".to_string()));

        let json = serde_json::to_string(&cat).expect("serialize");
        let back: Category = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, cat);
    }

    #[test]
    fn supersession_kind_strings() {
        assert_eq!(SupersessionKind::Correction.as_str(), "correction");
        assert_eq!(SupersessionKind::Refinement.to_string(), "refinement");
        assert_eq!(
            serde_json::to_string(&SupersessionKind::Retraction).expect("serialize"),
            "\"retraction\""
        );
    }
}
