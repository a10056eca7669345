//! Pipeline controller
//!
//! Owns one debounce → analyze → present cycle per editor. Everything that
//! mutates controller state happens on a single task: surface messages, change
//! notifications, debounce firings, analysis completions and highlight retries
//! all arrive as `select!` branches. Analysis requests run on their own tasks
//! and report back through the event channel tagged with the cycle epoch and
//! their sequence number, so late arrivals from a torn-down cycle or an
//! outdated request are dropped.

mod sequence;

pub use sequence::{SequenceGuard, StalePolicy};

use crate::analysis::{AnalysisError, AnalysisRequest, AnalysisResult, Analyzer};
use crate::change::Subscription;
use crate::config::Config;
use crate::debounce::Debouncer;
use crate::editor::{EditSnapshot, EditorAccessor, EditorHost};
use crate::history::{History, SessionRecord};
use crate::messages::SurfaceMessage;
use crate::present::{HighlightOutcome, Presenter, RetryPolicy};
use crate::stopwatch::Stopwatch;
use crate::surface::{StatusKind, StatusMessage, Surface};
use crate::visibility::{VisibilityGate, VisibilityState};
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where the current cycle is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PipelinePhase {
    #[default]
    Idle,
    PendingDebounce,
    Requesting,
    Presenting,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub debounce: Duration,
    pub retry: RetryPolicy,
    pub stale: StalePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1500),
            retry: RetryPolicy::default(),
            stale: StalePolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: config.debounce(),
            retry: config.retry_policy(),
            stale: config.stale_responses,
        }
    }
}

/// Counters returned when the controller exits.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub sessions: Vec<SessionRecord>,
    pub requests_issued: u64,
    pub results_presented: u64,
    pub stale_dropped: u64,
    /// Cycles skipped because the surface was not visible
    pub suppressed: u64,
    pub failures: u64,
}

enum PipelineEvent {
    Debounced {
        epoch: u64,
        snapshot: EditSnapshot,
    },
    Completed {
        epoch: u64,
        seq: u64,
        outcome: AnalysisOutcome,
    },
}

enum AnalysisOutcome {
    /// The gate closed between dispatch and the request task starting
    Suppressed,
    Finished(Result<AnalysisResult, AnalysisError>),
}

struct PendingHighlight {
    lines: BTreeSet<u32>,
    retry: u32,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct SessionCounters {
    analyses: u32,
    failures: u32,
    lines_flagged: u32,
}

/// Everything needed to start a controller. Call [`Pipeline::spawn`] from
/// inside a tokio runtime.
pub struct Pipeline {
    host: Arc<dyn EditorHost>,
    changes: Subscription,
    analyzer: Arc<dyn Analyzer>,
    surface: Box<dyn Surface>,
    settings: PipelineSettings,
    gate: VisibilityGate,
    history: Option<History>,
}

impl Pipeline {
    pub fn new(
        host: Arc<dyn EditorHost>,
        changes: Subscription,
        analyzer: Arc<dyn Analyzer>,
        surface: Box<dyn Surface>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            host,
            changes,
            analyzer,
            surface,
            settings,
            gate: VisibilityGate::new(),
            history: None,
        }
    }

    /// Persist finished sessions here.
    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    /// Share an existing visibility gate instead of creating one.
    pub fn with_gate(mut self, gate: VisibilityGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn spawn(self) -> PipelineHandle {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(PipelinePhase::Idle);
        let gate = self.gate.clone();

        let accessor = EditorAccessor::resolve(self.host.clone());
        match &accessor {
            Some(accessor) => info!(problem = %accessor.problem_id(), "pipeline started"),
            None => info!("pipeline started without a problem; waiting for navigation"),
        }

        let controller = Controller {
            host: self.host,
            accessor,
            changes: self.changes,
            changes_open: true,
            analyzer: self.analyzer,
            surface: self.surface,
            presenter: Presenter::new(self.settings.retry),
            gate: self.gate,
            settings: self.settings,
            history: self.history,
            writes: Vec::new(),
            messages: messages_rx,
            events_tx,
            events: events_rx,
            phase: phase_tx,
            epoch: 0,
            debouncer: None,
            debounce_pending: false,
            sequence: SequenceGuard::new(self.settings.stale),
            in_flight: Vec::new(),
            last_dispatched: None,
            pending_highlight: None,
            stopwatch: Stopwatch::new(),
            session: SessionCounters::default(),
            report: PipelineReport::default(),
        };

        PipelineHandle {
            messages: messages_tx,
            phase: phase_rx,
            gate,
            task: tokio::spawn(controller.run()),
        }
    }
}

/// Client side of a running controller.
pub struct PipelineHandle {
    messages: mpsc::UnboundedSender<SurfaceMessage>,
    phase: watch::Receiver<PipelinePhase>,
    gate: VisibilityGate,
    task: JoinHandle<PipelineReport>,
}

impl PipelineHandle {
    /// Deliver a surface message. False once the controller has exited.
    pub fn send(&self, message: SurfaceMessage) -> bool {
        self.messages.send(message).is_ok()
    }

    /// A sender that can be moved into input-reading tasks.
    pub fn sender(&self) -> mpsc::UnboundedSender<SurfaceMessage> {
        self.messages.clone()
    }

    pub fn phase(&self) -> PipelinePhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<PipelinePhase> {
        self.phase.clone()
    }

    pub fn visibility(&self) -> VisibilityState {
        self.gate.snapshot()
    }

    /// Ask the controller to stop and wait for its report.
    pub async fn shutdown(self) -> anyhow::Result<PipelineReport> {
        let _ = self.messages.send(SurfaceMessage::Shutdown);
        self.join().await
    }

    /// Wait for the controller to exit on its own (a `Shutdown` message).
    pub async fn join(self) -> anyhow::Result<PipelineReport> {
        self.task
            .await
            .map_err(|err| anyhow::anyhow!("Pipeline task failed: {}", err))
    }
}

struct Controller {
    host: Arc<dyn EditorHost>,
    accessor: Option<EditorAccessor>,
    changes: Subscription,
    changes_open: bool,
    analyzer: Arc<dyn Analyzer>,
    surface: Box<dyn Surface>,
    presenter: Presenter,
    gate: VisibilityGate,
    settings: PipelineSettings,
    history: Option<History>,
    /// Pending history appends, awaited before the report is returned
    writes: Vec<JoinHandle<()>>,

    messages: mpsc::UnboundedReceiver<SurfaceMessage>,
    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
    phase: watch::Sender<PipelinePhase>,

    /// Bumped on every teardown; events from older epochs are ignored
    epoch: u64,
    debouncer: Option<Debouncer<EditSnapshot>>,
    debounce_pending: bool,
    sequence: SequenceGuard,
    in_flight: Vec<(u64, JoinHandle<()>)>,
    /// (problem id, code) of the last request, to skip unchanged content
    last_dispatched: Option<(String, String)>,
    pending_highlight: Option<PendingHighlight>,

    stopwatch: Stopwatch,
    session: SessionCounters,
    report: PipelineReport,
}

impl Controller {
    async fn run(mut self) -> PipelineReport {
        loop {
            let retry_at = self.pending_highlight.as_ref().map(|p| p.deadline);
            tokio::select! {
                message = self.messages.recv() => match message {
                    Some(SurfaceMessage::Shutdown) | None => break,
                    Some(message) => self.handle_message(message),
                },
                changed = self.changes.changed(), if self.changes_open => match changed {
                    Some(()) => self.on_change(),
                    None => {
                        debug!("change source closed");
                        self.changes_open = false;
                    }
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                () = async {
                    match retry_at {
                        Some(at) => time::sleep_until(at).await,
                        None => future::pending::<()>().await,
                    }
                } => self.retry_highlight(),
            }
        }

        info!("pipeline shutting down");
        self.finish_session();
        self.teardown();
        for write in self.writes.drain(..) {
            if let Err(err) = write.await {
                warn!(error = %err, "session write task failed");
            }
        }
        self.report
    }

    fn set_phase(&self, phase: PipelinePhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(?previous, ?phase, "pipeline phase");
        }
    }

    /// Pick the phase that reflects whatever work is still outstanding.
    fn settle(&self) {
        let phase = if self.pending_highlight.is_some() {
            PipelinePhase::Presenting
        } else if self.debounce_pending {
            PipelinePhase::PendingDebounce
        } else if !self.in_flight.is_empty() {
            PipelinePhase::Requesting
        } else {
            PipelinePhase::Idle
        };
        self.set_phase(phase);
    }

    fn handle_message(&mut self, message: SurfaceMessage) {
        if let SurfaceMessage::Navigate { location } = &message {
            info!(%location, "navigation; resetting pipeline");
            self.finish_session();
            self.teardown();
            self.accessor = EditorAccessor::resolve(self.host.clone());
            if let Some(accessor) = &self.accessor {
                info!(problem = %accessor.problem_id(), "editor accessor resolved");
            }
            return;
        }

        let was_open = self.gate.should_proceed();
        self.gate.apply(&message);
        let open = self.gate.should_proceed();

        match message {
            SurfaceMessage::Activate => self.stopwatch.start(),
            SurfaceMessage::Restore | SurfaceMessage::Reopen if open => self.stopwatch.resume(),
            SurfaceMessage::Minimize | SurfaceMessage::Close => self.stopwatch.pause(),
            _ => {}
        }

        // Becoming visible analyzes whatever is already in the editor
        if !was_open && open {
            self.on_change();
        }
    }

    fn on_change(&mut self) {
        let Some(accessor) = &self.accessor else {
            debug!("change ignored; no problem resolved");
            return;
        };
        let Some(snapshot) = accessor.current_snapshot() else {
            return;
        };

        let unchanged = self
            .last_dispatched
            .as_ref()
            .is_some_and(|(problem, code)| *problem == snapshot.problem_id && *code == snapshot.code);
        if !unchanged {
            // Under LatestOnly this retires anything still in flight, so the
            // retired request can no longer vouch for its code either
            self.sequence.invalidate();
            self.last_dispatched = None;
        }

        if self.debouncer.is_none() {
            let events = self.events_tx.clone();
            let epoch = self.epoch;
            self.debouncer = Some(Debouncer::spawn(self.settings.debounce, move |snapshot| {
                let _ = events.send(PipelineEvent::Debounced { epoch, snapshot });
            }));
        }
        if let Some(debouncer) = &self.debouncer {
            debouncer.notify(snapshot);
        }
        self.debounce_pending = true;
        self.set_phase(PipelinePhase::PendingDebounce);
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Debounced { epoch, snapshot } => {
                if epoch != self.epoch {
                    return;
                }
                self.debounce_pending = false;
                self.dispatch(snapshot);
            }
            PipelineEvent::Completed {
                epoch,
                seq,
                outcome,
            } => {
                if epoch != self.epoch {
                    debug!(seq, "dropping response from a torn-down cycle");
                    return;
                }
                self.in_flight.retain(|(s, _)| *s != seq);
                self.complete(seq, outcome);
            }
        }
    }

    fn dispatch(&mut self, snapshot: EditSnapshot) {
        if !self.gate.should_proceed() {
            debug!("surface not visible; skipping analysis");
            self.report.suppressed += 1;
            self.settle();
            return;
        }

        let key = (snapshot.problem_id.clone(), snapshot.code.clone());
        if self.last_dispatched.as_ref() == Some(&key) {
            debug!("code unchanged since last analysis");
            self.settle();
            return;
        }

        let seq = self.sequence.issue();
        self.report.requests_issued += 1;
        self.last_dispatched = Some(key);

        let request = AnalysisRequest {
            code: snapshot.code,
            problem_id: snapshot.problem_id,
        };
        info!(
            seq,
            problem = %request.problem_id,
            lines = request.code.lines().count(),
            "requesting analysis"
        );

        // A persistent error stays up until an analysis succeeds
        let persistent = self
            .surface
            .status()
            .is_some_and(|status| status.kind == StatusKind::Persistent);
        if !persistent {
            self.surface
                .show_status(Some(StatusMessage::new(StatusKind::Info, "Analyzing…")));
            self.surface.flush();
        }

        let task = spawn_analysis(
            self.events_tx.clone(),
            self.epoch,
            seq,
            self.gate.clone(),
            self.analyzer.clone(),
            request,
        );
        self.in_flight.push((seq, task));
        self.set_phase(PipelinePhase::Requesting);
    }

    fn complete(&mut self, seq: u64, outcome: AnalysisOutcome) {
        let result = match outcome {
            AnalysisOutcome::Suppressed => {
                debug!(seq, "surface hidden before the request started");
                self.report.suppressed += 1;
                // Let the same code be analyzed once the surface is back
                self.last_dispatched = None;
                self.clear_info_status();
                self.settle();
                return;
            }
            AnalysisOutcome::Finished(result) => result,
        };

        if !self.sequence.accept(seq) {
            debug!(
                seq,
                latest = self.sequence.latest_issued(),
                "dropping stale analysis response"
            );
            self.report.stale_dropped += 1;
            self.settle();
            return;
        }

        match result {
            Ok(result) => self.present(result),
            Err(err) => self.fail(err),
        }
    }

    fn present(&mut self, result: AnalysisResult) {
        self.report.results_presented += 1;
        self.session.analyses += 1;
        let flagged = u32::try_from(result.line_numbers.len()).unwrap_or(u32::MAX);
        self.session.lines_flagged = self.session.lines_flagged.saturating_add(flagged);
        self.pending_highlight = None;
        self.set_phase(PipelinePhase::Presenting);

        self.surface.show_status(None);
        let outcome = self.presenter.present(self.surface.as_mut(), &result);
        info!(lines = ?result.line_numbers, ?outcome, "analysis presented");

        if outcome == HighlightOutcome::NoneMatched {
            match self.presenter.policy().delay_for(1) {
                Some(delay) => {
                    self.pending_highlight = Some(PendingHighlight {
                        lines: result.line_numbers,
                        retry: 1,
                        deadline: Instant::now() + delay,
                    });
                }
                None => debug!("highlight retries disabled"),
            }
        }
        self.settle();
    }

    fn fail(&mut self, err: AnalysisError) {
        self.report.failures += 1;
        self.session.failures += 1;
        // Same code may be retried on the next change
        self.last_dispatched = None;

        let kind = if err.is_persistent() {
            StatusKind::Persistent
        } else {
            StatusKind::Transient
        };
        warn!(error = %err, persistent = err.is_persistent(), "analysis failed");
        self.surface
            .show_status(Some(StatusMessage::new(kind, err.to_string())));
        self.surface.flush();

        if self.debounce_pending || !self.in_flight.is_empty() {
            self.settle();
        } else {
            self.set_phase(PipelinePhase::Errored);
        }
    }

    fn retry_highlight(&mut self) {
        let Some(mut pending) = self.pending_highlight.take() else {
            return;
        };
        let outcome =
            self.presenter
                .retry_highlights(self.surface.as_mut(), &pending.lines, pending.retry);
        if outcome == HighlightOutcome::NoneMatched {
            pending.retry += 1;
            if let Some(delay) = self.presenter.policy().delay_for(pending.retry) {
                pending.deadline = Instant::now() + delay;
                self.pending_highlight = Some(pending);
            }
        } else {
            debug!(retry = pending.retry, ?outcome, "highlight landed on retry");
        }
        self.settle();
    }

    fn clear_info_status(&mut self) {
        let info = self
            .surface
            .status()
            .is_some_and(|status| status.kind == StatusKind::Info);
        if info {
            self.surface.show_status(None);
            self.surface.flush();
        }
    }

    /// Cancel everything belonging to the current cycle.
    fn teardown(&mut self) {
        self.epoch += 1;
        self.debouncer = None;
        self.debounce_pending = false;
        self.pending_highlight = None;
        for (_, task) in self.in_flight.drain(..) {
            task.abort();
        }
        self.sequence.invalidate();
        self.last_dispatched = None;
        self.gate.reset();
        self.presenter.clear(self.surface.as_mut());
        self.clear_info_status();
        self.set_phase(PipelinePhase::Idle);
    }

    /// Close the stopwatch session, if any, and record it.
    fn finish_session(&mut self) {
        let counters = std::mem::take(&mut self.session);
        let Some((started_at, active)) = self.stopwatch.stop() else {
            return;
        };
        let Some(accessor) = &self.accessor else {
            return;
        };

        let record = SessionRecord {
            id: Uuid::new_v4(),
            problem_id: accessor.problem_id().to_string(),
            started_at,
            ended_at: Utc::now(),
            active_ms: u64::try_from(active.as_millis()).unwrap_or(u64::MAX),
            analyses: counters.analyses,
            failures: counters.failures,
            lines_flagged: counters.lines_flagged,
        };
        info!(
            problem = %record.problem_id,
            active_ms = record.active_ms,
            analyses = record.analyses,
            "session finished"
        );
        if let Some(history) = &self.history {
            // The history lock may be held by another process; wait for it
            // off the controller task
            let history = history.clone();
            let stored = record.clone();
            self.writes.retain(|write| !write.is_finished());
            self.writes.push(tokio::task::spawn_blocking(move || {
                if let Err(err) = history.append(&stored) {
                    warn!(error = %err, "failed to record session");
                }
            }));
        }
        self.report.sessions.push(record);
    }
}

fn spawn_analysis(
    events: mpsc::UnboundedSender<PipelineEvent>,
    epoch: u64,
    seq: u64,
    gate: VisibilityGate,
    analyzer: Arc<dyn Analyzer>,
    request: AnalysisRequest,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // The surface may have been hidden while this task was queued
        let outcome = if !gate.should_proceed() {
            AnalysisOutcome::Suppressed
        } else {
            match AssertUnwindSafe(analyzer.analyze(&request))
                .catch_unwind()
                .await
            {
                Ok(result) => AnalysisOutcome::Finished(result),
                Err(panic) => {
                    let detail = if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic payload".to_string()
                    };
                    AnalysisOutcome::Finished(Err(AnalysisError::service(format!(
                        "Analysis crashed unexpectedly: {}",
                        detail
                    ))))
                }
            }
        };
        let _ = events.send(PipelineEvent::Completed {
            epoch,
            seq,
            outcome,
        });
    })
}
