//! Session history
//!
//! Finished sessions are appended to `sessions.jsonl` in the data directory.
//! Writes are best-effort from the pipeline's point of view: a failure is
//! logged and the session simply isn't recorded.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

const SESSIONS_FILE: &str = "sessions.jsonl";
const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

/// One stretch of working on a problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub problem_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub active_ms: u64,
    pub analyses: u32,
    pub failures: u32,
    pub lines_flagged: u32,
}

/// Aggregated view of every session on one problem.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProblemStats {
    pub problem_id: String,
    pub sessions: u32,
    pub active_ms: u64,
    pub analyses: u32,
    pub failures: u32,
    pub lines_flagged: u32,
    pub last_seen: Option<DateTime<Utc>>,
}

impl ProblemStats {
    pub fn active(&self) -> Duration {
        Duration::from_millis(self.active_ms)
    }
}

#[derive(Debug, Clone)]
pub struct History {
    dir: PathBuf,
}

struct HistoryLock {
    file: fs::File,
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl History {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$COBRA_DATA_DIR`, or the platform data directory.
    pub fn open_default() -> Option<Self> {
        if let Ok(dir) = std::env::var("COBRA_DATA_DIR") {
            return Some(Self::new(dir));
        }
        dirs::data_dir().map(|d| Self::new(d.join("cobra")))
    }

    fn lock(&self, exclusive: bool) -> anyhow::Result<HistoryLock> {
        fs::create_dir_all(&self.dir)?;
        let lock_path = self.dir.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        anyhow::bail!(
                            "Timed out waiting for history lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        );
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }

        Ok(HistoryLock { file })
    }

    pub fn append(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let _lock = self.lock(true)?;
        let path = self.dir.join(SESSIONS_FILE);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let row = serde_json::to_string(record)?;
        writeln!(file, "{}", row)?;
        Ok(())
    }

    /// Up to `limit` latest records, newest last. Unreadable rows are skipped.
    pub fn load_recent(&self, limit: usize) -> anyhow::Result<Vec<SessionRecord>> {
        let path = self.dir.join(SESSIONS_FILE);
        if !path.exists() || limit == 0 {
            return Ok(Vec::new());
        }
        let _lock = self.lock(false)?;
        let content = fs::read_to_string(&path)?;
        let mut records: Vec<SessionRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str::<SessionRecord>(line).ok())
            .collect();
        if records.len() > limit {
            let split = records.len() - limit;
            records.drain(0..split);
        }
        Ok(records)
    }

    /// Per-problem totals, most recently seen first.
    pub fn summarize(&self, limit: usize) -> anyhow::Result<Vec<ProblemStats>> {
        Ok(summarize_records(&self.load_recent(limit)?))
    }
}

pub fn summarize_records(records: &[SessionRecord]) -> Vec<ProblemStats> {
    let mut by_problem: BTreeMap<&str, ProblemStats> = BTreeMap::new();
    for record in records {
        let stats = by_problem
            .entry(record.problem_id.as_str())
            .or_insert_with(|| ProblemStats {
                problem_id: record.problem_id.clone(),
                ..ProblemStats::default()
            });
        stats.sessions += 1;
        stats.active_ms = stats.active_ms.saturating_add(record.active_ms);
        stats.analyses += record.analyses;
        stats.failures += record.failures;
        stats.lines_flagged += record.lines_flagged;
        stats.last_seen = stats.last_seen.max(Some(record.ended_at));
    }
    let mut stats: Vec<ProblemStats> = by_problem.into_values().collect();
    stats.sort_by(|a, b| {
        b.last_seen
            .cmp(&a.last_seen)
            .then_with(|| a.problem_id.cmp(&b.problem_id))
    });
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(problem: &str, minute: u32, active_ms: u64, analyses: u32) -> SessionRecord {
        let started_at = Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap();
        SessionRecord {
            id: Uuid::new_v4(),
            problem_id: problem.to_string(),
            started_at,
            ended_at: started_at + chrono::Duration::minutes(1),
            active_ms,
            analyses,
            failures: 0,
            lines_flagged: analyses * 2,
        }
    }

    #[test]
    fn test_append_and_load_recent() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());
        assert!(history.load_recent(10).unwrap().is_empty());

        for i in 0..5 {
            history.append(&record("two-sum", i, 1000, 1)).unwrap();
        }
        let recent = history.load_recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].started_at.format("%M").to_string(), "04");
    }

    #[test]
    fn test_corrupt_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());
        history.append(&record("two-sum", 0, 1000, 1)).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(SESSIONS_FILE))
            .unwrap();
        writeln!(file, "{{ half a row").unwrap();
        history.append(&record("3sum", 1, 1000, 1)).unwrap();
        assert_eq!(history.load_recent(10).unwrap().len(), 2);
    }

    #[test]
    fn test_summarize_groups_by_problem() {
        let records = vec![
            record("two-sum", 0, 60_000, 2),
            record("3sum", 5, 30_000, 1),
            record("two-sum", 10, 15_000, 3),
        ];
        let stats = summarize_records(&records);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].problem_id, "two-sum");
        assert_eq!(stats[0].sessions, 2);
        assert_eq!(stats[0].active(), Duration::from_secs(75));
        assert_eq!(stats[0].analyses, 5);
        assert_eq!(stats[0].lines_flagged, 10);
        assert_eq!(stats[1].problem_id, "3sum");
    }
}
