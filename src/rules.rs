//! Static rule-based review (offline fallback)
//!
//! A handful of regex rules for habits interviewers notice. This is a lookup
//! table, not an analyzer: it only sees one line at a time plus a rough idea
//! of which lines sit inside a loop.

use crate::analysis::{AnalysisError, AnalysisRequest, AnalysisResult, Analyzer};
use futures::future::BoxFuture;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleId {
    DebugPrint,
    BareExcept,
    NoneEquality,
    RangeLen,
    LooseEquality,
    VarDeclaration,
    SortInLoop,
    DeveloperMarker,
}

impl RuleId {
    pub fn label(&self) -> &'static str {
        match self {
            RuleId::DebugPrint => "debug-print",
            RuleId::BareExcept => "bare-except",
            RuleId::NoneEquality => "none-equality",
            RuleId::RangeLen => "range-len",
            RuleId::LooseEquality => "loose-equality",
            RuleId::VarDeclaration => "var-declaration",
            RuleId::SortInLoop => "sort-in-loop",
            RuleId::DeveloperMarker => "developer-marker",
        }
    }
}

struct Rule {
    id: RuleId,
    regex: Regex,
    message: &'static str,
    /// Only fires on lines nested inside a loop
    in_loop_only: bool,
}

const RULE_SOURCES: &[(RuleId, &str, &str, bool)] = &[
    (
        RuleId::DebugPrint,
        r"^\s*(?:print\s*\(|console\.log\s*\(|System\.out\.print|std::cout\s*<<|fmt\.Print|println!\s*\()",
        "leftover debug output; remove it before submitting",
        false,
    ),
    (
        RuleId::BareExcept,
        r"^\s*except\s*:",
        "bare `except:` hides real errors; catch a specific exception",
        false,
    ),
    (
        RuleId::NoneEquality,
        r"[!=]=\s*None\b",
        "compare with `is None` / `is not None` instead of `==`",
        false,
    ),
    (
        RuleId::RangeLen,
        r"\bfor\s+\w+\s+in\s+range\s*\(\s*len\s*\(",
        "`range(len(...))` loop; `enumerate` is clearer",
        false,
    ),
    (
        RuleId::LooseEquality,
        r"[^=!<>]==[^=]|!=[^=]",
        "loose equality; prefer `===` / `!==` in JavaScript",
        false,
    ),
    (
        RuleId::VarDeclaration,
        r"^\s*var\s+\w+",
        "`var` is function-scoped; use `let` or `const`",
        false,
    ),
    (
        RuleId::SortInLoop,
        r"\.sort\s*\(|\bsorted\s*\(|Arrays\.sort\s*\(|\bsort\s*\(",
        "sorting inside a loop multiplies the cost; sort once outside",
        true,
    ),
    (
        RuleId::DeveloperMarker,
        r"(?i)\b(?:TODO|FIXME|XXX)\b",
        "unfinished code marker",
        false,
    ),
];

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        RULE_SOURCES
            .iter()
            .map(|(id, source, message, in_loop_only)| Rule {
                id: *id,
                regex: Regex::new(source).expect("rule pattern must compile"),
                message: *message,
                in_loop_only: *in_loop_only,
            })
            .collect()
    })
}

fn loop_header() -> &'static Regex {
    static LOOP: OnceLock<Regex> = OnceLock::new();
    LOOP.get_or_init(|| {
        Regex::new(r"^\s*(?:for\b|while\b|\}\s*while\b|do\s*\{)").expect("loop pattern must compile")
    })
}

/// Which language family a line looks like, for rules that only make sense
/// in one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Python,
    JavaScript,
    Other,
}

fn detect_flavor(code: &str) -> Flavor {
    let python = code.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("def ") || (t.starts_with("class ") && t.ends_with(':'))
    });
    if python {
        return Flavor::Python;
    }
    let js = code.contains("function ")
        || code.contains("=>")
        || code.contains("const ")
        || code.contains("let ")
        || code.contains("var ");
    if js {
        Flavor::JavaScript
    } else {
        Flavor::Other
    }
}

fn applies(id: RuleId, flavor: Flavor) -> bool {
    match id {
        RuleId::BareExcept | RuleId::NoneEquality | RuleId::RangeLen => flavor == Flavor::Python,
        RuleId::LooseEquality | RuleId::VarDeclaration => flavor == Flavor::JavaScript,
        RuleId::DebugPrint | RuleId::SortInLoop | RuleId::DeveloperMarker => true,
    }
}

/// A rule hit on a 1-based line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub line: u32,
    pub rule: RuleId,
    pub message: &'static str,
}

/// Run every rule over `code`. Findings are ordered by line, then rule order.
pub fn scan(code: &str) -> Vec<Finding> {
    let flavor = detect_flavor(code);
    let mut findings = Vec::new();
    // Indentation of the loop headers we're currently nested in
    let mut loop_indents: Vec<usize> = Vec::new();

    for (index, line) in code.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        while loop_indents.last().is_some_and(|&outer| indent <= outer) {
            loop_indents.pop();
        }
        let in_loop = !loop_indents.is_empty();

        for rule in rules() {
            if !applies(rule.id, flavor) || (rule.in_loop_only && !in_loop) {
                continue;
            }
            if rule.regex.is_match(line) {
                findings.push(Finding {
                    line: u32::try_from(index + 1).unwrap_or(u32::MAX),
                    rule: rule.id,
                    message: rule.message,
                });
            }
        }

        if loop_header().is_match(line) {
            loop_indents.push(indent);
        }
    }

    findings
}

/// Render findings as review text in the same "Line N:" form the remote
/// service is asked to use.
pub fn render_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "Offline review: no obvious issues found by the static rules.".to_string();
    }
    let mut out = String::from("Offline review (static rules):\n");
    for finding in findings {
        out.push_str(&format!(
            "- Line {}: {} [{}]\n",
            finding.line,
            finding.message,
            finding.rule.label()
        ));
    }
    out
}

/// Analyzer backed by the static rule table. Never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticAnalyzer;

impl Analyzer for StaticAnalyzer {
    fn analyze<'a>(
        &'a self,
        request: &'a AnalysisRequest,
    ) -> BoxFuture<'a, Result<AnalysisResult, AnalysisError>> {
        Box::pin(async move {
            let findings = scan(&request.code);
            Ok(AnalysisResult::from_narrative(render_findings(&findings)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_lines(code: &str, id: RuleId) -> Vec<u32> {
        scan(code)
            .into_iter()
            .filter(|f| f.rule == id)
            .map(|f| f.line)
            .collect()
    }

    #[test]
    fn test_python_rules() {
        let code = "\
def two_sum(nums, target):
    seen = {}
    for i in range(len(nums)):
        print(nums[i])
        if seen.get(target - nums[i]) == None:
            seen[nums[i]] = i
    try:
        pass
    except:
        pass
";
        assert_eq!(rule_lines(code, RuleId::RangeLen), vec![3]);
        assert_eq!(rule_lines(code, RuleId::DebugPrint), vec![4]);
        assert_eq!(rule_lines(code, RuleId::NoneEquality), vec![5]);
        assert_eq!(rule_lines(code, RuleId::BareExcept), vec![9]);
        // Python `==` is fine
        assert!(rule_lines(code, RuleId::LooseEquality).is_empty());
    }

    #[test]
    fn test_javascript_rules() {
        let code = "\
var twoSum = function(nums, target) {
  const seen = new Map();
  if (nums.length == 0) return [];
  console.log(nums);
  return seen.get(target) === undefined ? [] : [1];
};
";
        assert_eq!(rule_lines(code, RuleId::VarDeclaration), vec![1]);
        assert_eq!(rule_lines(code, RuleId::LooseEquality), vec![3]);
        assert_eq!(rule_lines(code, RuleId::DebugPrint), vec![4]);
    }

    #[test]
    fn test_sort_only_flagged_inside_loops() {
        let code = "\
def solve(nums):
    nums.sort()
    for x in nums:
        nums.sort()
    return nums
";
        assert_eq!(rule_lines(code, RuleId::SortInLoop), vec![4]);
    }

    #[test]
    fn test_markers() {
        let code = "int solve() {\n  // TODO handle empty\n  return 0;\n}\n";
        assert_eq!(rule_lines(code, RuleId::DeveloperMarker), vec![2]);
    }

    #[test]
    fn test_clean_code_has_no_findings() {
        let code = "def add(a, b):\n    return a + b\n";
        assert!(scan(code).is_empty());
        assert!(render_findings(&[]).contains("no obvious issues"));
    }

    #[tokio::test]
    async fn test_static_analyzer_lines_round_trip_through_extractor() {
        let request = AnalysisRequest {
            code: "def f(x):\n    print(x)\n    return x == None\n".to_string(),
            problem_id: "two-sum".to_string(),
        };
        let result = StaticAnalyzer.analyze(&request).await.unwrap();
        assert_eq!(result.line_numbers.into_iter().collect::<Vec<_>>(), vec![2, 3]);
        assert!(result.narrative.contains("Line 2:"));
    }
}
