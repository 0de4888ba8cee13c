//! Neighbour offset generation.

use crate::schema::NeighbourhoodType;

/// Relative coordinate of a neighbour, one component per grid axis.
pub type Offset = Vec<i32>;

/// Produces the neighbour offsets for a neighbourhood type and range.
///
/// Implementations may return offsets in any order and with duplicates; the
/// kernel compiler normalizes them with [`normalize_offsets`].
pub trait NeighbourhoodGenerator {
    fn offsets(&self, kind: NeighbourhoodType, range: u32, dimension: usize) -> Vec<Offset>;
}

/// The built-in neighbourhood shapes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardNeighbourhoods;

impl NeighbourhoodGenerator for StandardNeighbourhoods {
    fn offsets(&self, kind: NeighbourhoodType, range: u32, dimension: usize) -> Vec<Offset> {
        let range = range as i32;
        let dimension = dimension as i32;
        cube(range, dimension as usize)
            .into_iter()
            .filter(|offset| {
                let shell = offset.iter().map(|c| c.abs()).max().unwrap_or(0);
                let on_shell = offset.iter().filter(|c| c.abs() == shell).count() as i32;
                match kind {
                    NeighbourhoodType::Moore => true,
                    NeighbourhoodType::VonNeumann => offset.iter().map(|c| c.abs()).sum::<i32>() <= range,
                    NeighbourhoodType::Axis => offset.iter().filter(|&&c| c != 0).count() == 1,
                    NeighbourhoodType::Face => on_shell == 1,
                    NeighbourhoodType::Edge => on_shell == dimension - 1,
                    NeighbourhoodType::Corner => on_shell == dimension,
                }
            })
            .collect()
    }
}

/// Every offset in `[-range, range]^dimension` except the origin.
fn cube(range: i32, dimension: usize) -> Vec<Offset> {
    let mut offsets: Vec<Offset> = vec![Vec::with_capacity(dimension)];
    for _ in 0..dimension {
        offsets = offsets
            .into_iter()
            .flat_map(|prefix| {
                (-range..=range).map(move |c| {
                    let mut next = prefix.clone();
                    next.push(c);
                    next
                })
            })
            .collect();
    }
    offsets.retain(|offset| offset.iter().any(|&c| c != 0));
    offsets
}

/// Sort ascending (lexicographic by component) and drop duplicates.
pub fn normalize_offsets(mut offsets: Vec<Offset>) -> Vec<Offset> {
    offsets.sort();
    offsets.dedup();
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(kind: NeighbourhoodType, range: u32, dimension: usize) -> usize {
        StandardNeighbourhoods.offsets(kind, range, dimension).len()
    }

    #[test]
    fn test_moore_counts() {
        assert_eq!(count(NeighbourhoodType::Moore, 1, 2), 8);
        assert_eq!(count(NeighbourhoodType::Moore, 2, 2), 24);
        assert_eq!(count(NeighbourhoodType::Moore, 1, 3), 26);
    }

    #[test]
    fn test_von_neumann_counts() {
        assert_eq!(count(NeighbourhoodType::VonNeumann, 1, 2), 4);
        assert_eq!(count(NeighbourhoodType::VonNeumann, 2, 2), 12);
        assert_eq!(count(NeighbourhoodType::VonNeumann, 1, 3), 6);
    }

    #[test]
    fn test_axis_counts() {
        assert_eq!(count(NeighbourhoodType::Axis, 1, 2), 4);
        assert_eq!(count(NeighbourhoodType::Axis, 3, 2), 12);
        assert_eq!(count(NeighbourhoodType::Axis, 2, 3), 12);
    }

    #[test]
    fn test_shell_classes_3d() {
        assert_eq!(count(NeighbourhoodType::Face, 1, 3), 6);
        assert_eq!(count(NeighbourhoodType::Edge, 1, 3), 12);
        assert_eq!(count(NeighbourhoodType::Corner, 1, 3), 8);
    }

    #[test]
    fn test_shell_classes_2d() {
        assert_eq!(
            StandardNeighbourhoods.offsets(NeighbourhoodType::Face, 1, 2),
            StandardNeighbourhoods.offsets(NeighbourhoodType::Edge, 1, 2)
        );
        assert_eq!(count(NeighbourhoodType::Corner, 1, 2), 4);
        assert_eq!(count(NeighbourhoodType::Corner, 2, 2), 8);
    }

    #[test]
    fn test_origin_excluded() {
        for kind in NeighbourhoodType::ALL {
            for dimension in [2, 3] {
                let offsets = StandardNeighbourhoods.offsets(kind, 2, dimension);
                assert!(offsets.iter().all(|o| o.iter().any(|&c| c != 0)), "{kind:?}");
                assert!(offsets.iter().all(|o| o.len() == dimension));
            }
        }
    }

    #[test]
    fn test_range_zero_is_empty() {
        assert!(StandardNeighbourhoods.offsets(NeighbourhoodType::Moore, 0, 2).is_empty());
    }

    #[test]
    fn test_normalize_is_order_independent() {
        let offsets = StandardNeighbourhoods.offsets(NeighbourhoodType::Moore, 1, 2);
        let mut reversed = offsets.clone();
        reversed.reverse();
        reversed.push(vec![1, 1]);

        let a = normalize_offsets(offsets);
        let b = normalize_offsets(reversed);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_eq!(a[0], vec![-1, -1]);
        assert_eq!(a[7], vec![1, 1]);
    }
}
