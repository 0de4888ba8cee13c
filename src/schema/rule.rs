//! Rule descriptors - the normalized form a rule string is parsed into.
//!
//! A descriptor is a closed sum type over the supported rule families, so the
//! kernel compiler can match on it exhaustively.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::compute::CompileError;

/// Shape of the neighbourhood sampled around each cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NeighbourhoodType {
    /// Every cell within Chebyshev distance `range`.
    #[default]
    Moore,
    /// Every cell within Manhattan distance `range`.
    VonNeumann,
    /// Cells along the coordinate axes.
    Axis,
    /// Diagonal cells (every component non-zero, equal magnitudes).
    Corner,
    /// Cells on the edges of the surrounding cube shells.
    Edge,
    /// Cells on the faces of the surrounding cube shells.
    Face,
}

impl NeighbourhoodType {
    pub const ALL: [NeighbourhoodType; 6] = [
        NeighbourhoodType::Moore,
        NeighbourhoodType::VonNeumann,
        NeighbourhoodType::Axis,
        NeighbourhoodType::Corner,
        NeighbourhoodType::Edge,
        NeighbourhoodType::Face,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NeighbourhoodType::Moore => "moore",
            NeighbourhoodType::VonNeumann => "von-neumann",
            NeighbourhoodType::Axis => "axis",
            NeighbourhoodType::Corner => "corner",
            NeighbourhoodType::Edge => "edge",
            NeighbourhoodType::Face => "face",
        }
    }

    /// Look up a neighbourhood by its name or single-letter shorthand (`M`, `V`).
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("m") {
            return Some(NeighbourhoodType::Moore);
        }
        if name.eq_ignore_ascii_case("v") {
            return Some(NeighbourhoodType::VonNeumann);
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

/// Neighbourhood type together with its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Neighbourhood {
    #[serde(rename = "type")]
    pub kind: NeighbourhoodType,
    pub range: u32,
}

impl Neighbourhood {
    pub fn new(kind: NeighbourhoodType, range: u32) -> Self {
        Self { kind, range }
    }
}

impl Default for Neighbourhood {
    fn default() -> Self {
        Self {
            kind: NeighbourhoodType::Moore,
            range: 1,
        }
    }
}

/// Tag naming a rule family without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleFamily {
    Life,
    ExtendedLife,
    Generations,
    ExtendedGenerations,
    ExtendedStochastic,
    Vote,
    Luky,
    Nluky,
    Cyclic,
    Debug,
}

impl RuleFamily {
    pub const ALL: [RuleFamily; 10] = [
        RuleFamily::Life,
        RuleFamily::ExtendedLife,
        RuleFamily::Generations,
        RuleFamily::ExtendedGenerations,
        RuleFamily::ExtendedStochastic,
        RuleFamily::Vote,
        RuleFamily::Luky,
        RuleFamily::Nluky,
        RuleFamily::Cyclic,
        RuleFamily::Debug,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RuleFamily::Life => "life",
            RuleFamily::ExtendedLife => "extended-life",
            RuleFamily::Generations => "generations",
            RuleFamily::ExtendedGenerations => "extended-generations",
            RuleFamily::ExtendedStochastic => "extended-stochastic",
            RuleFamily::Vote => "vote",
            RuleFamily::Luky => "luky",
            RuleFamily::Nluky => "nluky",
            RuleFamily::Cyclic => "cyclic",
            RuleFamily::Debug => "debug",
        }
    }
}

impl fmt::Display for RuleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleFamily {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.name() == s)
            .ok_or_else(|| CompileError::UnsupportedRuleFamily(s.to_string()))
    }
}

/// Family-specific parameters of a rule.
///
/// Neighbour sums are stored as plain integers; set-valued parameters are kept
/// in the order they were written and compacted by the kernel compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "kebab-case")]
pub enum RuleKind {
    Life {
        survival: Vec<u32>,
        birth: Vec<u32>,
    },
    ExtendedLife {
        survival: Vec<u32>,
        birth: Vec<u32>,
    },
    Generations {
        state_count: u32,
        survival: Vec<u32>,
        birth: Vec<u32>,
    },
    ExtendedGenerations {
        state_count: u32,
        survival: Vec<u32>,
        birth: Vec<u32>,
    },
    /// Birth and survival probabilities keyed by neighbour sum.
    ExtendedStochastic {
        survival: BTreeMap<u32, f64>,
        birth: BTreeMap<u32, f64>,
    },
    /// Majority-style vote over the neighbourhood including the cell itself.
    Vote {
        votes: Vec<u32>,
    },
    Luky {
        low_survival: u32,
        high_survival: u32,
        low_birth: u32,
        high_birth: u32,
    },
    Nluky {
        state_count: u32,
        low_survival: u32,
        high_survival: u32,
        low_birth: u32,
        high_birth: u32,
    },
    Cyclic {
        state_count: u32,
        threshold: u32,
        greenberg_hastings: bool,
    },
    /// Writes a value derived from the cell coordinates.
    Debug,
}

impl RuleKind {
    pub fn family(&self) -> RuleFamily {
        match self {
            RuleKind::Life { .. } => RuleFamily::Life,
            RuleKind::ExtendedLife { .. } => RuleFamily::ExtendedLife,
            RuleKind::Generations { .. } => RuleFamily::Generations,
            RuleKind::ExtendedGenerations { .. } => RuleFamily::ExtendedGenerations,
            RuleKind::ExtendedStochastic { .. } => RuleFamily::ExtendedStochastic,
            RuleKind::Vote { .. } => RuleFamily::Vote,
            RuleKind::Luky { .. } => RuleFamily::Luky,
            RuleKind::Nluky { .. } => RuleFamily::Nluky,
            RuleKind::Cyclic { .. } => RuleFamily::Cyclic,
            RuleKind::Debug => RuleFamily::Debug,
        }
    }
}

/// A parsed rule: family parameters, neighbourhood and the source string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDescriptor {
    pub rule_string: String,
    #[serde(default)]
    pub neighbourhood: Neighbourhood,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl RuleDescriptor {
    pub fn new(rule_string: impl Into<String>, neighbourhood: Neighbourhood, kind: RuleKind) -> Self {
        Self {
            rule_string: rule_string.into(),
            neighbourhood,
            kind,
        }
    }

    /// The coordinate-diagnostic rule.
    pub fn debug() -> Self {
        Self::new("debug", Neighbourhood::default(), RuleKind::Debug)
    }

    #[inline]
    pub fn family(&self) -> RuleFamily {
        self.kind.family()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_names_round_trip() {
        for family in RuleFamily::ALL {
            assert_eq!(family.name().parse::<RuleFamily>().unwrap(), family);
        }
    }

    #[test]
    fn test_unknown_family_is_rejected() {
        let err = "brians-brain".parse::<RuleFamily>().unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedRuleFamily(ref name) if name == "brians-brain"));
    }

    #[test]
    fn test_neighbourhood_shorthands() {
        assert_eq!(NeighbourhoodType::from_name("M"), Some(NeighbourhoodType::Moore));
        assert_eq!(NeighbourhoodType::from_name("v"), Some(NeighbourhoodType::VonNeumann));
        assert_eq!(NeighbourhoodType::from_name("Corner"), Some(NeighbourhoodType::Corner));
        assert_eq!(NeighbourhoodType::from_name("hex"), None);
    }

    #[test]
    fn test_descriptor_json_uses_family_tag() {
        let descriptor = RuleDescriptor::new(
            "23/3",
            Neighbourhood::default(),
            RuleKind::Life {
                survival: vec![2, 3],
                birth: vec![3],
            },
        );
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["family"], "life");
        assert_eq!(json["neighbourhood"]["type"], "moore");

        let back: RuleDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, descriptor);
    }
}
