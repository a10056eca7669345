use chrono::{TimeZone, Utc};
use cobra::analysis::AnalysisResult;
use cobra::extract::extract_line_numbers;
use cobra::history::{History, SessionRecord};
use cobra::present::Presenter;
use cobra::rules;
use cobra::surface::MemorySurface;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use uuid::Uuid;

fn synthetic_review(paragraphs: usize) -> String {
    let mut text = String::new();
    for i in 0..paragraphs {
        let line = i * 3 + 1;
        text.push_str(&format!(
            "The loop at line {line} recomputes the prefix sum. Lines {}-{} could share it, \
             and lines {}, {} and {} repeat the bounds check (line {}). Consider a hash map.\n\n",
            line + 1,
            line + 4,
            line + 5,
            line + 7,
            line + 9,
            line + 2,
        ));
    }
    text
}

fn synthetic_solution(functions: usize) -> String {
    let mut code = String::new();
    for i in 0..functions {
        code.push_str(&format!(
            "def helper_{i}(nums):\n    for a in nums:\n        for b in nums:\n            nums.sort()\n            if a == b: print(a)\n    return list\n\n"
        ));
    }
    code
}

fn bench_extract_line_numbers(c: &mut Criterion) {
    let short = "Line 7 has an off-by-one; lines 10-11 duplicate the check.";
    let long = synthetic_review(200);

    c.bench_function("extract_short_review", |b| {
        b.iter(|| black_box(extract_line_numbers(black_box(short))));
    });
    c.bench_function("extract_long_review", |b| {
        b.iter(|| black_box(extract_line_numbers(black_box(&long))));
    });
}

fn bench_static_scan(c: &mut Criterion) {
    let code = synthetic_solution(150);
    c.bench_function("static_rules_scan", |b| {
        b.iter(|| black_box(rules::scan(black_box(&code)).len()));
    });
}

fn bench_present(c: &mut Criterion) {
    let result = AnalysisResult::from_narrative(synthetic_review(50));
    let presenter = Presenter::default();
    let mut surface = MemorySurface::with_line_count(400);

    c.bench_function("present_with_highlights", |b| {
        b.iter(|| black_box(presenter.present(&mut surface, &result)));
    });
}

fn bench_history_summary(c: &mut Criterion) {
    let temp = tempfile::tempdir().expect("tempdir");
    let history = History::new(temp.path());
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    for i in 0..2_000i64 {
        let started_at = base + chrono::Duration::minutes(i * 30);
        history
            .append(&SessionRecord {
                id: Uuid::new_v4(),
                problem_id: format!("problem-{}", i % 40),
                started_at,
                ended_at: started_at + chrono::Duration::minutes(20),
                active_ms: 900_000,
                analyses: 4,
                failures: 0,
                lines_flagged: 6,
            })
            .expect("append session");
    }

    c.bench_function("history_summarize_2k", |b| {
        b.iter(|| black_box(history.summarize(2_000).map(|s| s.len()).ok()));
    });
}

criterion_group!(
    extract,
    bench_extract_line_numbers,
    bench_static_scan,
    bench_present,
    bench_history_summary
);
criterion_main!(extract);
