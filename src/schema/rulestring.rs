//! Rule-string parsing.
//!
//! The automaton only depends on the [`RuleParser`] trait; [`RuleStringParser`]
//! implements the common notations (life `S/B`, generations, vote, LUKY/NLUKY,
//! cyclic `R/T/C/N` and the extended `E` notation with ranges and probabilities).

use std::collections::BTreeMap;

use super::rule::{Neighbourhood, NeighbourhoodType, RuleDescriptor, RuleKind};

/// Largest neighbour sum accepted in a range expression.
const MAX_SUM: u32 = 65_535;

/// Turns a textual rule into a descriptor. `None` means the text is not a rule.
pub trait RuleParser {
    fn parse(&self, rule: &str) -> Option<RuleDescriptor>;
}

/// Parser for the built-in rule notations.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleStringParser;

impl RuleParser for RuleStringParser {
    fn parse(&self, rule: &str) -> Option<RuleDescriptor> {
        let text = rule.trim();
        if text.is_empty() {
            return None;
        }

        let (neighbourhood, kind) = if text.eq_ignore_ascii_case("debug") {
            (Neighbourhood::default(), RuleKind::Debug)
        } else if let Some(rest) = strip_prefix_ci(text, "NLUKY") {
            parse_nluky(rest)?
        } else if let Some(rest) = strip_prefix_ci(text, "LUKY") {
            parse_luky(rest)?
        } else if let Some(rest) = strip_prefix_ci(text, "E") {
            parse_extended(rest)?
        } else if strip_prefix_ci(text, "R").is_some() {
            parse_cyclic(&compact(text))?
        } else if text.contains('/') {
            parse_life(&compact(text))?
        } else {
            parse_vote(&compact(text))?
        };

        Some(RuleDescriptor::new(text, neighbourhood, kind))
    }
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &text[prefix.len()..])
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn parse_digits(text: &str) -> Option<Vec<u32>> {
    text.chars().map(|c| c.to_digit(10)).collect()
}

fn parse_range(text: &str) -> Option<u32> {
    if text.is_empty() { Some(1) } else { text.parse().ok() }
}

/// Split a glued `M`/`V` neighbourhood suffix (with optional range) off a token.
fn split_suffix(text: &str) -> Option<(&str, Neighbourhood)> {
    let digits_start = text.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let head = &text[..digits_start];
    let kind = match head.chars().last()?.to_ascii_uppercase() {
        'M' => NeighbourhoodType::Moore,
        'V' => NeighbourhoodType::VonNeumann,
        _ => return None,
    };
    let range = parse_range(&text[digits_start..])?;
    Some((&head[..head.len() - 1], Neighbourhood::new(kind, range)))
}

fn with_suffix(text: &str) -> (&str, Neighbourhood) {
    split_suffix(text).unwrap_or((text, Neighbourhood::default()))
}

/// A standalone neighbourhood token such as `moore`, `von-neumann2` or `V3`.
fn parse_neighbourhood_token(token: &str) -> Option<Neighbourhood> {
    if !token.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    let split = token.find(|c: char| c.is_ascii_digit()).unwrap_or(token.len());
    let kind = NeighbourhoodType::from_name(&token[..split])?;
    Some(Neighbourhood::new(kind, parse_range(&token[split..])?))
}

fn strip_letter(text: &str, letter: char) -> &str {
    match text.chars().next() {
        Some(c) if c.eq_ignore_ascii_case(&letter) => &text[1..],
        _ => text,
    }
}

fn parse_life(text: &str) -> Option<(Neighbourhood, RuleKind)> {
    let (body, neighbourhood) = with_suffix(text);
    let sections: Vec<&str> = body.split('/').collect();
    if !(2..=3).contains(&sections.len()) {
        return None;
    }

    let birth_first = sections[0].starts_with(['B', 'b']);
    let (survival, birth) = if birth_first {
        (strip_letter(sections[1], 'S'), strip_letter(sections[0], 'B'))
    } else {
        (strip_letter(sections[0], 'S'), strip_letter(sections[1], 'B'))
    };
    let survival = parse_digits(survival)?;
    let birth = parse_digits(birth)?;

    let kind = match sections.get(2) {
        Some(states) => RuleKind::Generations {
            state_count: strip_letter(states, 'C').parse().ok()?,
            survival,
            birth,
        },
        None => RuleKind::Life { survival, birth },
    };
    Some((neighbourhood, kind))
}

fn parse_vote(text: &str) -> Option<(Neighbourhood, RuleKind)> {
    let (body, neighbourhood) = with_suffix(text);
    if body.is_empty() {
        return None;
    }
    Some((neighbourhood, RuleKind::Vote { votes: parse_digits(body)? }))
}

/// Numbers written either as one run of single digits or as separate tokens,
/// optionally followed by a neighbourhood.
fn parse_numbers(text: &str, count: usize) -> Option<(Neighbourhood, Vec<u32>)> {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    let mut neighbourhood = Neighbourhood::default();

    if tokens.len() > 1
        && let Some(found) = tokens.last().and_then(|token| parse_neighbourhood_token(token))
    {
        tokens.pop();
        neighbourhood = found;
    } else if let Some(&last) = tokens.last()
        && let Some((body, found)) = split_suffix(last)
    {
        let index = tokens.len() - 1;
        tokens[index] = body;
        neighbourhood = found;
    }

    let numbers = match tokens.as_slice() {
        [single] if single.len() == count => parse_digits(single)?,
        _ if tokens.len() == count => tokens
            .iter()
            .map(|token| token.parse().ok())
            .collect::<Option<Vec<u32>>>()?,
        _ => return None,
    };
    Some((neighbourhood, numbers))
}

fn parse_luky(text: &str) -> Option<(Neighbourhood, RuleKind)> {
    let (neighbourhood, n) = parse_numbers(text, 4)?;
    let kind = RuleKind::Luky {
        low_birth: n[0],
        high_birth: n[1],
        low_survival: n[2],
        high_survival: n[3],
    };
    Some((neighbourhood, kind))
}

fn parse_nluky(text: &str) -> Option<(Neighbourhood, RuleKind)> {
    let (neighbourhood, n) = parse_numbers(text, 5)?;
    let kind = RuleKind::Nluky {
        state_count: n[0],
        low_birth: n[1],
        high_birth: n[2],
        low_survival: n[3],
        high_survival: n[4],
    };
    Some((neighbourhood, kind))
}

fn parse_cyclic(text: &str) -> Option<(Neighbourhood, RuleKind)> {
    let mut range = 1;
    let mut threshold = 1;
    let mut state_count = None;
    let mut kind = NeighbourhoodType::Moore;
    let mut greenberg_hastings = false;

    for part in text.split('/') {
        let upper = part.to_ascii_uppercase();
        if upper == "GH" {
            greenberg_hastings = true;
            continue;
        }
        let value = &upper[upper.chars().next()?.len_utf8()..];
        match upper.chars().next()? {
            'R' => range = value.parse().ok()?,
            'T' => threshold = value.parse().ok()?,
            'C' => state_count = Some(value.parse().ok()?),
            'N' => {
                kind = match value {
                    "M" => NeighbourhoodType::Moore,
                    "N" => NeighbourhoodType::VonNeumann,
                    _ => return None,
                }
            }
            _ => return None,
        }
    }

    let kind_params = RuleKind::Cyclic {
        state_count: state_count?,
        threshold,
        greenberg_hastings,
    };
    Some((Neighbourhood::new(kind, range), kind_params))
}

struct Entry {
    low: u32,
    high: u32,
    probability: Option<f64>,
}

fn parse_entry(token: &str) -> Option<Entry> {
    let (values, probability) = match token.split_once(':') {
        Some((values, p)) => (values, Some(p.parse::<f64>().ok()?)),
        None => (token, None),
    };
    let (low, high) = match values.split_once("..") {
        Some((low, high)) => (low.parse().ok()?, high.parse().ok()?),
        None => {
            let value = values.parse().ok()?;
            (value, value)
        }
    };
    (low <= high && high <= MAX_SUM).then_some(Entry {
        low,
        high,
        probability,
    })
}

fn parse_entries(section: &str) -> Option<Vec<Entry>> {
    section
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(parse_entry)
        .collect()
}

fn expand(entries: &[Entry]) -> Vec<u32> {
    entries.iter().flat_map(|e| e.low..=e.high).collect()
}

fn expand_probabilities(entries: &[Entry]) -> BTreeMap<u32, f64> {
    let mut map = BTreeMap::new();
    for entry in entries {
        for sum in entry.low..=entry.high {
            map.insert(sum, entry.probability.unwrap_or(1.0));
        }
    }
    map
}

fn parse_extended(text: &str) -> Option<(Neighbourhood, RuleKind)> {
    let sections: Vec<&str> = text.split('/').collect();
    if !(2..=3).contains(&sections.len()) {
        return None;
    }

    // A trailing neighbourhood token lives in the last section.
    let last = sections[sections.len() - 1].trim();
    let (body, token) = last.rsplit_once(char::is_whitespace).unwrap_or(("", last));
    let (last_body, neighbourhood) = match parse_neighbourhood_token(token) {
        Some(found) => (body, found),
        None => (last, Neighbourhood::default()),
    };

    let survival = parse_entries(sections[0])?;
    let birth = parse_entries(if sections.len() == 2 { last_body } else { sections[1] })?;
    let stochastic = survival.iter().chain(&birth).any(|e| e.probability.is_some());

    let kind = if sections.len() == 3 {
        if stochastic {
            return None;
        }
        RuleKind::ExtendedGenerations {
            state_count: strip_letter(last_body.trim(), 'C').parse().ok()?,
            survival: expand(&survival),
            birth: expand(&birth),
        }
    } else if stochastic {
        RuleKind::ExtendedStochastic {
            survival: expand_probabilities(&survival),
            birth: expand_probabilities(&birth),
        }
    } else {
        RuleKind::ExtendedLife {
            survival: expand(&survival),
            birth: expand(&birth),
        }
    };
    Some((neighbourhood, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(rule: &str) -> RuleDescriptor {
        RuleStringParser
            .parse(rule)
            .unwrap_or_else(|| panic!("'{rule}' should parse"))
    }

    #[test]
    fn test_conway_life() {
        let descriptor = parse("23/3");
        assert_eq!(
            descriptor.kind,
            RuleKind::Life {
                survival: vec![2, 3],
                birth: vec![3]
            }
        );
        assert_eq!(descriptor.neighbourhood, Neighbourhood::default());
        assert_eq!(descriptor.rule_string, "23/3");
    }

    #[test]
    fn test_von_neumann_suffix_with_range() {
        let descriptor = parse("1/1V2");
        assert_eq!(
            descriptor.neighbourhood,
            Neighbourhood::new(NeighbourhoodType::VonNeumann, 2)
        );
        assert_eq!(
            descriptor.kind,
            RuleKind::Life {
                survival: vec![1],
                birth: vec![1]
            }
        );
    }

    #[test]
    fn test_empty_survival_with_letters() {
        let descriptor = parse("S/B12V");
        assert_eq!(
            descriptor.neighbourhood,
            Neighbourhood::new(NeighbourhoodType::VonNeumann, 1)
        );
        assert_eq!(
            descriptor.kind,
            RuleKind::Life {
                survival: vec![],
                birth: vec![1, 2]
            }
        );
    }

    #[test]
    fn test_birth_first_notation() {
        assert_eq!(parse("B3/S23").kind, parse("23/3").kind);
    }

    #[test]
    fn test_generations() {
        let descriptor = parse("S23/B3/C8M2");
        assert_eq!(
            descriptor.kind,
            RuleKind::Generations {
                state_count: 8,
                survival: vec![2, 3],
                birth: vec![3]
            }
        );
        assert_eq!(descriptor.neighbourhood, Neighbourhood::new(NeighbourhoodType::Moore, 2));
    }

    #[test]
    fn test_vote() {
        let descriptor = parse("13579V");
        assert_eq!(descriptor.kind, RuleKind::Vote { votes: vec![1, 3, 5, 7, 9] });
        assert_eq!(descriptor.neighbourhood.kind, NeighbourhoodType::VonNeumann);
    }

    #[test]
    fn test_luky_forms() {
        let expected = RuleKind::Luky {
            low_birth: 3,
            high_birth: 3,
            low_survival: 2,
            high_survival: 3,
        };
        assert_eq!(parse("LUKY 3323").kind, expected);
        assert_eq!(parse("luky 3 3 2 3").kind, expected);

        let with_token = parse("LUKY 3 3 2 3 von-neumann2");
        assert_eq!(with_token.kind, expected);
        assert_eq!(
            with_token.neighbourhood,
            Neighbourhood::new(NeighbourhoodType::VonNeumann, 2)
        );
    }

    #[test]
    fn test_nluky() {
        assert_eq!(
            parse("NLUKY 2 3 3 2 3").kind,
            RuleKind::Nluky {
                state_count: 2,
                low_birth: 3,
                high_birth: 3,
                low_survival: 2,
                high_survival: 3
            }
        );
        assert!(RuleStringParser.parse("NLUKY 2 3 3").is_none());
    }

    #[test]
    fn test_cyclic() {
        let descriptor = parse("R2/T3/C4/NN/GH");
        assert_eq!(
            descriptor.kind,
            RuleKind::Cyclic {
                state_count: 4,
                threshold: 3,
                greenberg_hastings: true
            }
        );
        assert_eq!(
            descriptor.neighbourhood,
            Neighbourhood::new(NeighbourhoodType::VonNeumann, 2)
        );
        assert!(RuleStringParser.parse("R1/T3/NM").is_none());
    }

    #[test]
    fn test_extended_life_ranges() {
        let descriptor = parse("E 2..3,5/3 axis2");
        assert_eq!(
            descriptor.kind,
            RuleKind::ExtendedLife {
                survival: vec![2, 3, 5],
                birth: vec![3]
            }
        );
        assert_eq!(descriptor.neighbourhood, Neighbourhood::new(NeighbourhoodType::Axis, 2));
    }

    #[test]
    fn test_extended_generations() {
        let descriptor = parse("E 2..3/3/8 V2");
        assert_eq!(
            descriptor.kind,
            RuleKind::ExtendedGenerations {
                state_count: 8,
                survival: vec![2, 3],
                birth: vec![3]
            }
        );
        assert_eq!(
            descriptor.neighbourhood,
            Neighbourhood::new(NeighbourhoodType::VonNeumann, 2)
        );
    }

    #[test]
    fn test_extended_stochastic_forms() {
        let all_born = parse("E / 0..24:1.0");
        match all_born.kind {
            RuleKind::ExtendedStochastic { survival, birth } => {
                assert!(survival.is_empty());
                assert_eq!(birth.len(), 25);
                assert!(birth.values().all(|&p| p == 1.0));
            }
            other => panic!("expected stochastic rule, got {other:?}"),
        }

        let all_die = parse("E 0:0.0 /");
        match all_die.kind {
            RuleKind::ExtendedStochastic { survival, birth } => {
                assert_eq!(survival, BTreeMap::from([(0, 0.0)]));
                assert!(birth.is_empty());
            }
            other => panic!("expected stochastic rule, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_rule() {
        assert_eq!(parse("debug").kind, RuleKind::Debug);
        assert_eq!(parse("DEBUG").kind, RuleKind::Debug);
    }

    #[test]
    fn test_rejects_garbage() {
        for rule in ["", "hello", "23/3/4/5", "E 3..1/2", "2x/3", "E 1:abc/2"] {
            assert!(RuleStringParser.parse(rule).is_none(), "'{rule}' should not parse");
        }
    }
}
