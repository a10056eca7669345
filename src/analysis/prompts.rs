use super::AnalysisRequest;

pub const REVIEW_SYSTEM: &str = r#"You are a coding interview coach reviewing a candidate's work-in-progress solution.

Give short, specific feedback:
- correctness problems and edge cases the code misses
- time and space complexity, and whether a better approach exists
- readability issues an interviewer would notice

Rules:
- Refer to code by its line number using the form "Line N:" (or "lines N-M" for a block).
- Only cite line numbers that appear in the numbered code.
- Do not write the full solution for the candidate. Hints, not answers.
- Keep it under 200 words."#;

/// User prompt: problem slug plus the code with 1-based line numbers.
pub fn review_user_prompt(request: &AnalysisRequest) -> String {
    format!(
        "Problem: {}\n\nCandidate code:\n```\n{}```\n",
        request.problem_id,
        numbered_code(&request.code)
    )
}

/// Prefix every line with its 1-based number.
pub fn numbered_code(code: &str) -> String {
    let count = code.lines().count();
    let width = count.to_string().len();
    let mut out = String::with_capacity(code.len() + count * (width + 3));
    for (index, line) in code.lines().enumerate() {
        out.push_str(&format!("{:>width$} | {}\n", index + 1, line));
    }
    out
}
