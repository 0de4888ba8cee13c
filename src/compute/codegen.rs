//! Building blocks shared by the WGSL generator and the CPU reference:
//! value encoding and compaction of value sets into range checks.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// Cell value to normalized texel channel.
#[inline]
pub fn encode_value(value: u8) -> f32 {
    value as f32 / 255.0
}

/// Normalized texel channel back to a cell value (`floor(x * 255 + 0.5)`).
#[inline]
pub fn decode_value(packed: f32) -> u8 {
    (packed * 255.0 + 0.5).floor().clamp(0.0, 255.0) as u8
}

/// A set of integers stored as sorted, disjoint inclusive ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSet {
    groups: Vec<RangeInclusive<u32>>,
}

impl ValueSet {
    /// Sort, dedup and merge runs of consecutive integers.
    pub fn compact(values: &[u32]) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut groups: Vec<RangeInclusive<u32>> = Vec::new();
        for value in sorted {
            match groups.last_mut() {
                Some(last) if *last.end() + 1 == value => *last = *last.start()..=value,
                _ => groups.push(value..=value),
            }
        }
        Self { groups }
    }

    pub fn from_range(low: u32, high: u32) -> Self {
        let groups = if low <= high { vec![low..=high] } else { Vec::new() };
        Self { groups }
    }

    pub fn groups(&self) -> &[RangeInclusive<u32>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, value: i32) -> bool {
        u32::try_from(value).is_ok_and(|v| self.groups.iter().any(|g| g.contains(&v)))
    }

    /// WGSL boolean expression testing `variable` for membership.
    ///
    /// Singletons become `v == k`, runs become `(v >= lo && v <= hi)`, joined
    /// with `||` and parenthesized when there is more than one group.
    pub fn condition(&self, variable: &str) -> String {
        let checks: Vec<String> = self
            .groups
            .iter()
            .map(|group| range_check(variable, group))
            .collect();
        join_checks(checks)
    }
}

fn range_check(variable: &str, group: &RangeInclusive<u32>) -> String {
    if group.start() == group.end() {
        format!("{variable} == {}", group.start())
    } else {
        format!("({variable} >= {} && {variable} <= {})", group.start(), group.end())
    }
}

fn join_checks(checks: Vec<String>) -> String {
    match checks.len() {
        0 => "false".to_string(),
        1 => checks.into_iter().collect(),
        _ => format!("({})", checks.join(" || ")),
    }
}

/// Consecutive sums sharing one probability.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityGroup {
    pub sums: RangeInclusive<u32>,
    pub probability: f64,
}

/// Per-sum probabilities compacted into groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbabilityCheck {
    groups: Vec<ProbabilityGroup>,
}

impl ProbabilityCheck {
    pub fn compact(probabilities: &BTreeMap<u32, f64>) -> Self {
        let mut groups: Vec<ProbabilityGroup> = Vec::new();
        for (&sum, &probability) in probabilities {
            match groups.last_mut() {
                Some(last) if *last.sums.end() + 1 == sum && last.probability == probability => {
                    last.sums = *last.sums.start()..=sum;
                }
                _ => groups.push(ProbabilityGroup {
                    sums: sum..=sum,
                    probability,
                }),
            }
        }
        Self { groups }
    }

    pub fn groups(&self) -> &[ProbabilityGroup] {
        &self.groups
    }

    /// Probability attached to `sum`, zero when absent.
    pub fn probability(&self, sum: i32) -> f64 {
        u32::try_from(sum)
            .ok()
            .and_then(|s| self.groups.iter().find(|g| g.sums.contains(&s)))
            .map_or(0.0, |g| g.probability)
    }

    /// WGSL boolean expression. Groups with probability 1 are plain range
    /// checks, groups with probability 0 are dropped and the rest are and-ed
    /// with `random_expr < p`.
    pub fn condition(&self, variable: &str, random_expr: &str) -> String {
        let checks: Vec<String> = self
            .groups
            .iter()
            .filter(|group| group.probability > 0.0)
            .map(|group| {
                let check = range_check(variable, &group.sums);
                if group.probability >= 1.0 {
                    check
                } else {
                    format!(
                        "({check} && {random_expr} < {})",
                        float_literal(group.probability)
                    )
                }
            })
            .collect();
        join_checks(checks)
    }
}

/// A WGSL float literal; always carries a decimal point or exponent.
pub fn float_literal(value: f64) -> String {
    format!("{value:?}")
}
