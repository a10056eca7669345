//! Result presentation
//!
//! Renders a narrative and highlights the lines it references. The host may
//! re-render its line elements at any time, so a highlight pass that matches
//! nothing is retried under an explicit `RetryPolicy`. A highlight that never
//! lands is logged and otherwise ignored; the analysis itself still counts.

use crate::analysis::AnalysisResult;
use crate::surface::Surface;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for highlight retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based). `None` once exhausted.
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }
        let factor = self.multiplier.max(1).saturating_pow(retry - 1);
        Some(self.base_delay.saturating_mul(factor))
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_retries).filter_map(move |retry| self.delay_for(retry))
    }
}

/// Map a 1-based line reference onto a 0-based element index.
///
/// 1-based is authoritative. If the reference falls outside the 1-based range
/// it is tried as a 0-based index, which in practice only rescues "line 0".
pub fn map_line_to_element(line: u32, element_count: usize) -> Option<usize> {
    let line = line as usize;
    if (1..=element_count).contains(&line) {
        Some(line - 1)
    } else if line < element_count {
        Some(line)
    } else {
        None
    }
}

/// What a highlight pass achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightOutcome {
    /// The result referenced no lines
    NothingToHighlight,
    /// This many lines were highlighted
    Applied(usize),
    /// Lines were referenced but none could be matched yet
    NoneMatched,
}

#[derive(Debug, Clone, Default)]
pub struct Presenter {
    policy: RetryPolicy,
}

impl Presenter {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Render the narrative, drop old highlights and make the first highlight
    /// attempt. `NoneMatched` means the caller should schedule retries.
    pub fn present(&self, surface: &mut dyn Surface, result: &AnalysisResult) -> HighlightOutcome {
        surface.show_narrative(&result.narrative);
        surface.clear_highlights();
        let outcome = self.apply_highlights(surface, &result.line_numbers);
        surface.flush();
        outcome
    }

    /// One highlight pass over the surface's current line elements.
    pub fn apply_highlights(
        &self,
        surface: &mut dyn Surface,
        lines: &BTreeSet<u32>,
    ) -> HighlightOutcome {
        if lines.is_empty() {
            return HighlightOutcome::NothingToHighlight;
        }
        let count = surface.line_element_count();
        let mut matched = 0;
        for &line in lines {
            match map_line_to_element(line, count) {
                Some(index) if surface.highlight_element(index) => matched += 1,
                _ => debug!(line, elements = count, "line not present in editor view"),
            }
        }
        if matched == 0 {
            HighlightOutcome::NoneMatched
        } else {
            HighlightOutcome::Applied(matched)
        }
    }

    /// Retry pass `retry` (1-based). Logs when the last retry still fails.
    pub fn retry_highlights(
        &self,
        surface: &mut dyn Surface,
        lines: &BTreeSet<u32>,
        retry: u32,
    ) -> HighlightOutcome {
        let outcome = self.apply_highlights(surface, lines);
        surface.flush();
        if outcome == HighlightOutcome::NoneMatched && retry >= self.policy.max_retries {
            warn!(
                retries = retry,
                lines = lines.len(),
                "giving up on highlighting; no referenced line is in the editor view"
            );
        }
        outcome
    }

    /// Present and run the whole retry schedule inline.
    pub async fn present_with_retry(
        &self,
        surface: &mut dyn Surface,
        result: &AnalysisResult,
    ) -> HighlightOutcome {
        let mut outcome = self.present(surface, result);
        let mut retry = 1;
        while outcome == HighlightOutcome::NoneMatched {
            let Some(delay) = self.policy.delay_for(retry) else {
                break;
            };
            tokio::time::sleep(delay).await;
            outcome = self.retry_highlights(surface, &result.line_numbers, retry);
            retry += 1;
        }
        outcome
    }

    /// Remove every highlight, e.g. when a new cycle starts.
    pub fn clear(&self, surface: &mut dyn Surface) {
        surface.clear_highlights();
        surface.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;

    fn result(narrative: &str, lines: &[u32]) -> AnalysisResult {
        AnalysisResult {
            narrative: narrative.to_string(),
            line_numbers: lines.iter().copied().collect(),
        }
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000)
            ]
        );
        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(4), None);
    }

    #[test]
    fn test_line_mapping() {
        assert_eq!(map_line_to_element(1, 5), Some(0));
        assert_eq!(map_line_to_element(5, 5), Some(4));
        // 0-based fallback
        assert_eq!(map_line_to_element(0, 5), Some(0));
        assert_eq!(map_line_to_element(6, 5), None);
        assert_eq!(map_line_to_element(1, 0), None);
    }

    #[test]
    fn test_present_replaces_previous_highlights() {
        let surface = MemorySurface::with_line_count(10);
        let mut target = surface.clone();
        let presenter = Presenter::default();

        presenter.present(&mut target, &result("Line 2: a", &[2, 3]));
        assert_eq!(surface.highlighted_elements(), vec![1, 2]);

        let outcome = presenter.present(&mut target, &result("Line 9: b", &[9]));
        assert_eq!(outcome, HighlightOutcome::Applied(1));
        assert_eq!(surface.highlighted_elements(), vec![8]);
        assert_eq!(surface.narrative().as_deref(), Some("Line 9: b"));
    }

    #[test]
    fn test_clear_leaves_no_highlights() {
        let surface = MemorySurface::with_line_count(10);
        let mut target = surface.clone();
        let presenter = Presenter::default();
        presenter.present(&mut target, &result("lines 1-4", &[1, 2, 3, 4]));
        presenter.clear(&mut target);
        assert!(surface.highlighted_elements().is_empty());
    }

    #[test]
    fn test_empty_line_set_is_not_a_failure() {
        let mut surface = MemorySurface::with_line_count(10);
        let outcome = Presenter::default().present(&mut surface, &result("All good", &[]));
        assert_eq!(outcome, HighlightOutcome::NothingToHighlight);
        assert_eq!(surface.narrative().as_deref(), Some("All good"));
    }

    #[test]
    fn test_partial_match_counts() {
        let mut surface = MemorySurface::with_line_count(3);
        let outcome = Presenter::default().present(&mut surface, &result("x", &[2, 40]));
        assert_eq!(outcome, HighlightOutcome::Applied(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_absorbs_late_rerender() {
        let surface = MemorySurface::with_line_count(0);
        let rerender = surface.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            rerender.set_line_count(8);
        });

        let mut target = surface.clone();
        let outcome = Presenter::default()
            .present_with_retry(&mut target, &result("Line 3: x", &[3]))
            .await;
        // 500ms retry misses, 1000ms later (t=1500) the lines exist
        assert_eq!(outcome, HighlightOutcome::Applied(1));
        assert_eq!(surface.highlighted_elements(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_policy() {
        let mut surface = MemorySurface::with_line_count(0);
        let start = tokio::time::Instant::now();
        let outcome = Presenter::default()
            .present_with_retry(&mut surface, &result("Line 3: x", &[3]))
            .await;
        assert_eq!(outcome, HighlightOutcome::NoneMatched);
        assert_eq!(start.elapsed(), Duration::from_millis(3500));
    }
}
