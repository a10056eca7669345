//! Line reference extraction
//!
//! Pulls "line N" style references out of free-form review text. The pattern
//! list is a fixed lookup table applied in order; every match contributes to a
//! single sorted, deduplicated set.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Ranges wider than this are treated as prose ("lines 1-4000 of the file"),
/// not as something worth highlighting.
const MAX_RANGE_SPAN: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// One capture group holding a single line number
    Single,
    /// Two capture groups holding an inclusive range
    Range,
    /// One capture group holding a comma/"and" separated list
    List,
}

struct LinePattern {
    regex: Regex,
    shape: Shape,
}

const PATTERN_SOURCES: &[(&str, Shape)] = &[
    // "lines 10-11", "line 3 to 5", "Lines 4 through 9"
    (
        r"(?i)\blines?\s+(\d+)\s*(?:-|\u{2013}|\u{2014}|\bto\b|\bthrough\b)\s*(\d+)\b",
        Shape::Range,
    ),
    // "lines 3, 5 and 8"
    (
        r"(?i)\blines\s+(\d+(?:\s*(?:,\s*(?:and\s+)?|and\s+|&\s*)\d+)+)\b",
        Shape::List,
    ),
    // "(line 4)"
    (r"(?i)\(\s*line\s+(\d+)\s*\)", Shape::Single),
    // "at line 12"
    (r"(?i)\bat\s+line\s+(\d+)\b", Shape::Single),
    // "on line 9"
    (r"(?i)\bon\s+line\s+(\d+)\b", Shape::Single),
    // "Line 7:"
    (r"(?i)\bline\s+(\d+)\s*:", Shape::Single),
    // bare "line 7"
    (r"(?i)\bline\s+(\d+)\b", Shape::Single),
];

fn patterns() -> &'static [LinePattern] {
    static PATTERNS: OnceLock<Vec<LinePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PATTERN_SOURCES
            .iter()
            .map(|(source, shape)| LinePattern {
                regex: Regex::new(source).expect("line reference pattern must compile"),
                shape: *shape,
            })
            .collect()
    })
}

fn digits() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"\d+").expect("digit pattern must compile"))
}

/// Extract every referenced line number from `text`.
///
/// Matching is case-insensitive. Ranges are inclusive and expanded; reversed
/// ranges are normalized. Line 0 is not a valid 1-based line and is dropped.
/// Text without references yields an empty set.
pub fn extract_line_numbers(text: &str) -> BTreeSet<u32> {
    let mut lines = BTreeSet::new();
    if text.trim().is_empty() {
        return lines;
    }

    // Range and list matches are blanked out once consumed, so the
    // single-line patterns never see their first number on its own
    let mut remaining = text.to_string();
    for pattern in patterns() {
        let mut consumed = Vec::new();
        for caps in pattern.regex.captures_iter(&remaining) {
            match pattern.shape {
                Shape::Single => {
                    if let Some(n) = caps.get(1).and_then(|m| parse_line(m.as_str())) {
                        lines.insert(n);
                    }
                }
                Shape::Range => {
                    let start = caps.get(1).and_then(|m| parse_line(m.as_str()));
                    let end = caps.get(2).and_then(|m| parse_line(m.as_str()));
                    if let (Some(a), Some(b)) = (start, end) {
                        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                        if hi - lo <= MAX_RANGE_SPAN {
                            lines.extend(lo..=hi);
                        }
                    }
                    consumed.push(caps.get(0).map(|m| m.range()));
                }
                Shape::List => {
                    if let Some(list) = caps.get(1) {
                        lines.extend(
                            digits()
                                .find_iter(list.as_str())
                                .filter_map(|m| parse_line(m.as_str())),
                        );
                    }
                    consumed.push(caps.get(0).map(|m| m.range()));
                }
            }
        }
        for span in consumed.into_iter().flatten() {
            let blank = " ".repeat(span.len());
            remaining.replace_range(span, &blank);
        }
    }

    lines.remove(&0);
    lines
}

fn parse_line(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<u32> {
        extract_line_numbers(text).into_iter().collect()
    }

    #[test]
    fn test_review_scenario() {
        let text = "Consider refactoring. Line 7: unused variable. Also check lines 10-11 for off-by-one.";
        assert_eq!(lines(text), vec![7, 10, 11]);
    }

    #[test]
    fn test_range_is_inclusive() {
        assert_eq!(lines("see lines 3-5"), vec![3, 4, 5]);
        assert_eq!(lines("Lines 4 through 6 repeat work"), vec![4, 5, 6]);
        assert_eq!(lines("line 2 to 3"), vec![2, 3]);
    }

    #[test]
    fn test_en_dash_range() {
        assert_eq!(lines("lines 8\u{2013}9"), vec![8, 9]);
    }

    #[test]
    fn test_reversed_range_is_normalized() {
        assert_eq!(lines("lines 6-4"), vec![4, 5, 6]);
    }

    #[test]
    fn test_huge_range_is_ignored() {
        assert!(lines("lines 1-100000 are all fine").is_empty());
    }

    #[test]
    fn test_skipped_range_does_not_leak_its_start() {
        assert!(lines("line 1-900").is_empty());
        assert!(lines("lines 1-900").is_empty());
        assert_eq!(lines("line 1-900 is boilerplate, but line 4 matters"), vec![4]);
    }

    #[test]
    fn test_phrasings_are_case_insensitive() {
        let text = "Bug AT LINE 12. Something (line 4) here. On Line 9 too. LINE 2: nit.";
        assert_eq!(lines(text), vec![2, 4, 9, 12]);
    }

    #[test]
    fn test_duplicates_collapse() {
        assert_eq!(lines("line 3, then line 3 again, and lines 2-4"), vec![2, 3, 4]);
    }

    #[test]
    fn test_enumeration() {
        assert_eq!(lines("Check lines 3, 5 and 8."), vec![3, 5, 8]);
        assert_eq!(lines("lines 1 & 12"), vec![1, 12]);
    }

    #[test]
    fn test_zero_is_dropped() {
        assert_eq!(lines("line 0 and line 1"), vec![1]);
    }

    #[test]
    fn test_no_matches_is_empty() {
        assert!(extract_line_numbers("").is_empty());
        assert!(extract_line_numbers("   ").is_empty());
        assert!(extract_line_numbers("Looks great, nothing to change.").is_empty());
        // "pipeline" and "deadline" must not count as "line"
        assert!(extract_line_numbers("the pipeline 4 deadline 5").is_empty());
    }

    #[test]
    fn test_overflowing_numbers_are_skipped() {
        assert_eq!(lines("line 99999999999 and line 5"), vec![5]);
    }
}
