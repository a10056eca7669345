//! Solve stopwatch
//!
//! Tracks how long the assistant was actually open on a problem. Active time
//! is a baseline accumulated over earlier running windows plus the time since
//! the current window's anchor.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopwatchStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    status: StopwatchStatus,
    started_at: Option<DateTime<Utc>>,
    baseline: Duration,
    anchor: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StopwatchStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Start a fresh session, or resume a paused one.
    pub fn start(&mut self) {
        match self.status {
            StopwatchStatus::Idle => {
                self.started_at = Some(Utc::now());
                self.baseline = Duration::ZERO;
                self.anchor = Some(Instant::now());
                self.status = StopwatchStatus::Running;
            }
            StopwatchStatus::Paused => self.resume(),
            StopwatchStatus::Running => {}
        }
    }

    pub fn pause(&mut self) {
        if self.status != StopwatchStatus::Running {
            return;
        }
        if let Some(anchor) = self.anchor.take() {
            self.baseline += anchor.elapsed();
        }
        self.status = StopwatchStatus::Paused;
    }

    pub fn resume(&mut self) {
        if self.status != StopwatchStatus::Paused {
            return;
        }
        self.anchor = Some(Instant::now());
        self.status = StopwatchStatus::Running;
    }

    pub fn active(&self) -> Duration {
        let running = self.anchor.map(|a| a.elapsed()).unwrap_or_default();
        self.baseline + running
    }

    /// Stop and reset. Returns the session start and active time if a session
    /// was in progress.
    pub fn stop(&mut self) -> Option<(DateTime<Utc>, Duration)> {
        if self.status == StopwatchStatus::Idle {
            return None;
        }
        let active = self.active();
        let started_at = self.started_at.unwrap_or_else(Utc::now);
        *self = Stopwatch::default();
        Some((started_at, active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_pause_excludes_time() {
        let mut watch = Stopwatch::new();
        watch.start();
        sleep(Duration::from_secs(10)).await;
        watch.pause();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(watch.active(), Duration::from_secs(10));
        watch.resume();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(watch.active(), Duration::from_secs(15));

        let (_, active) = watch.stop().unwrap();
        assert_eq!(active, Duration::from_secs(15));
        assert_eq!(watch.status(), StopwatchStatus::Idle);
        assert_eq!(watch.active(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_paused_resumes() {
        let mut watch = Stopwatch::new();
        watch.start();
        sleep(Duration::from_secs(2)).await;
        watch.pause();
        watch.start();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(watch.active(), Duration::from_secs(5));
    }

    #[test]
    fn test_stop_when_idle() {
        let mut watch = Stopwatch::new();
        assert!(watch.stop().is_none());
        watch.pause();
        watch.resume();
        assert_eq!(watch.status(), StopwatchStatus::Idle);
    }
}
