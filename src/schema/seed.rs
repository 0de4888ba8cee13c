//! Weighted random fills for seeding a grid.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A weighted list of cell values.
///
/// Serializes as `[[value, weight], ...]`. A `null` value counts towards the
/// total weight but is never assigned: a draw landing in its share falls
/// through to the next entry with a value. A draw left with no such entry
/// leaves the cell untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distribution {
    entries: Vec<(Option<u8>, f64)>,
}

impl Distribution {
    pub fn new(entries: Vec<(Option<u8>, f64)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[(Option<u8>, f64)] {
        &self.entries
    }

    /// Sum of all weights, `null` entries included.
    pub fn total_weight(&self) -> f64 {
        self.entries.iter().map(|(_, weight)| weight).sum()
    }

    /// Pick a value for a uniform draw `r` in `[0, 1)`.
    ///
    /// Entries are walked in order, subtracting each weight from `r * total`;
    /// the first entry with a value and a positive weight at which the
    /// selection is zero or below wins.
    pub fn sample(&self, r: f64) -> Option<u8> {
        let mut selection = r * self.total_weight();
        for &(value, weight) in &self.entries {
            selection -= weight;
            if selection <= 0.0
                && weight > 0.0
                && let Some(value) = value
            {
                return Some(value);
            }
        }
        None
    }

    /// Overwrite `cells` with draws from this distribution.
    pub fn fill<R: Rng + ?Sized>(&self, cells: &mut [u8], rng: &mut R) {
        for cell in cells.iter_mut() {
            if let Some(value) = self.sample(rng.r#gen::<f64>()) {
                *cell = value;
            }
        }
    }
}

impl From<&[(Option<u8>, f64)]> for Distribution {
    fn from(entries: &[(Option<u8>, f64)]) -> Self {
        Self::new(entries.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_zero_weight_value_never_assigned() {
        let distribution = Distribution::new(vec![(Some(0), 0.0), (Some(1), 100.0)]);
        let mut cells = vec![7u8; 64];
        let mut rng = StdRng::seed_from_u64(42);
        distribution.fill(&mut cells, &mut rng);
        assert!(cells.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_null_entry_leaves_cells_untouched() {
        let distribution = Distribution::new(vec![(None, 1.0)]);
        let mut cells = vec![5u8; 16];
        distribution.fill(&mut cells, &mut StdRng::seed_from_u64(1));
        assert!(cells.iter().all(|&c| c == 5));
    }

    #[test]
    fn test_sample_boundaries() {
        let distribution = Distribution::new(vec![(Some(2), 1.0), (None, 1.0), (Some(3), 2.0)]);
        assert_eq!(distribution.sample(0.0), Some(2));
        assert_eq!(distribution.sample(0.25), Some(2));
        // Lands in the null share and falls through to the next value.
        assert_eq!(distribution.sample(0.3), Some(3));
        assert_eq!(distribution.sample(0.9), Some(3));
    }

    #[test]
    fn test_null_share_goes_to_following_value() {
        let distribution = Distribution::new(vec![(None, 90.0), (Some(1), 10.0)]);
        assert_eq!(distribution.sample(0.5), Some(1));
        assert_eq!(distribution.sample(0.0), Some(1));

        let mut cells = vec![0u8; 64];
        distribution.fill(&mut cells, &mut StdRng::seed_from_u64(3));
        assert!(cells.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_trailing_null_share_leaves_cells_untouched() {
        let distribution = Distribution::new(vec![(Some(1), 1.0), (None, 1.0)]);
        assert_eq!(distribution.sample(0.25), Some(1));
        assert_eq!(distribution.sample(0.75), None);
    }

    #[test]
    fn test_fill_is_reproducible_with_seed() {
        let distribution = Distribution::new(vec![(Some(0), 1.0), (Some(1), 1.0)]);
        let mut a = vec![0u8; 100];
        let mut b = vec![0u8; 100];
        distribution.fill(&mut a, &mut StdRng::seed_from_u64(7));
        distribution.fill(&mut b, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert!(a.contains(&0) && a.contains(&1));
    }

    #[test]
    fn test_json_form() {
        let distribution: Distribution = serde_json::from_str("[[0, 90], [1, 10], [null, 5]]").unwrap();
        assert_eq!(
            distribution.entries(),
            &[(Some(0), 90.0), (Some(1), 10.0), (None, 5.0)]
        );
        assert_eq!(distribution.total_weight(), 105.0);
    }
}
