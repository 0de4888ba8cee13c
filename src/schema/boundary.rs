//! Out-of-bound sampling policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How neighbour lookups outside the grid are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// Out-of-range neighbours read as this constant.
    Fixed(i32),
    /// Coordinates are clamped to the nearest edge cell.
    Clamp,
    /// Toroidal topology.
    Wrap,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        BoundaryPolicy::Fixed(0)
    }
}

impl fmt::Display for BoundaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryPolicy::Fixed(value) => write!(f, "{value}"),
            BoundaryPolicy::Clamp => f.write_str("clamp"),
            BoundaryPolicy::Wrap => f.write_str("wrap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown out-of-bound policy '{0}' (expected 'clamp', 'wrap' or an integer)")]
pub struct ParseBoundaryError(pub String);

impl FromStr for BoundaryPolicy {
    type Err = ParseBoundaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("clamp") {
            Ok(BoundaryPolicy::Clamp)
        } else if trimmed.eq_ignore_ascii_case("wrap") {
            Ok(BoundaryPolicy::Wrap)
        } else {
            trimmed
                .parse::<i32>()
                .map(BoundaryPolicy::Fixed)
                .map_err(|_| ParseBoundaryError(s.to_string()))
        }
    }
}
