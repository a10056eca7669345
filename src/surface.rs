//! Consuming surfaces
//!
//! A surface is where results end up: it shows the narrative and a status
//! line, and it exposes the editor's visual line elements so they can be
//! highlighted. `TerminalSurface` renders to stdout; `MemorySurface` keeps
//! everything in memory for tests and one-shot runs.

use crate::editor::EditorHost;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{queue, terminal};
use std::cell::Cell;
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// How long a status message should stick around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Work in progress
    Info,
    /// Cleared by the next successful cycle
    Transient,
    /// Stays until configuration changes
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusMessage {
    pub fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

pub trait Surface: Send {
    fn show_narrative(&mut self, text: &str);
    fn show_status(&mut self, status: Option<StatusMessage>);
    fn status(&self) -> Option<StatusMessage>;
    /// Number of line elements the editor view currently renders.
    fn line_element_count(&self) -> usize;
    /// Highlight the element at a 0-based index. False if it doesn't exist.
    fn highlight_element(&mut self, index: usize) -> bool;
    fn clear_highlights(&mut self);
    fn highlighted_elements(&self) -> Vec<usize>;
    /// Push pending changes to the user.
    fn flush(&mut self) {}
}

#[derive(Debug, Default)]
struct MemoryState {
    narrative: Option<String>,
    status: Option<StatusMessage>,
    line_count: usize,
    highlighted: BTreeSet<usize>,
}

/// In-memory surface. Clones share state, so a test can hand one clone to
/// the pipeline and inspect another.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemorySurface {
    pub fn with_line_count(line_count: usize) -> Self {
        let surface = Self::default();
        surface.set_line_count(line_count);
        surface
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Simulate the host re-rendering its line elements.
    pub fn set_line_count(&self, line_count: usize) {
        self.with_state(|state| {
            state.line_count = line_count;
            state.highlighted.retain(|&i| i < line_count);
        });
    }

    pub fn narrative(&self) -> Option<String> {
        self.with_state(|state| state.narrative.clone())
    }
}

impl Surface for MemorySurface {
    fn show_narrative(&mut self, text: &str) {
        self.with_state(|state| state.narrative = Some(text.to_string()));
    }

    fn show_status(&mut self, status: Option<StatusMessage>) {
        self.with_state(|state| state.status = status);
    }

    fn status(&self) -> Option<StatusMessage> {
        self.with_state(|state| state.status.clone())
    }

    fn line_element_count(&self) -> usize {
        self.with_state(|state| state.line_count)
    }

    fn highlight_element(&mut self, index: usize) -> bool {
        self.with_state(|state| {
            if index < state.line_count {
                state.highlighted.insert(index);
                true
            } else {
                false
            }
        })
    }

    fn clear_highlights(&mut self) {
        self.with_state(|state| state.highlighted.clear());
    }

    fn highlighted_elements(&self) -> Vec<usize> {
        self.with_state(|state| state.highlighted.iter().copied().collect())
    }
}

/// Renders the solution file with highlighted lines, the narrative and the
/// status line to stdout.
pub struct TerminalSurface {
    host: Arc<dyn EditorHost>,
    narrative: Option<String>,
    status: Option<StatusMessage>,
    highlighted: BTreeSet<usize>,
    /// Line count from the last `line_element_count`, reused by the
    /// highlight calls of the same pass
    line_count: Cell<Option<usize>>,
    dirty: bool,
}

impl TerminalSurface {
    pub fn new(host: Arc<dyn EditorHost>) -> Self {
        Self {
            host,
            narrative: None,
            status: None,
            highlighted: BTreeSet::new(),
            line_count: Cell::new(None),
            dirty: false,
        }
    }

    fn lines(&self) -> Vec<String> {
        self.host
            .text()
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn render(&self, out: &mut impl Write) -> io::Result<()> {
        let width = terminal::size().map(|(w, _)| w as usize).unwrap_or(80);
        let rule = "─".repeat(width.clamp(20, 100));

        queue!(out, Print(format!("\n{}\n", rule)))?;
        let lines = self.lines();
        let gutter = lines.len().to_string().len().max(3);
        for (index, line) in lines.iter().enumerate() {
            if self.highlighted.contains(&index) {
                queue!(
                    out,
                    SetForegroundColor(Color::Yellow),
                    SetAttribute(Attribute::Bold),
                    Print(format!("{:>gutter$} ▌ {}\n", index + 1, line)),
                    SetAttribute(Attribute::Reset),
                    ResetColor
                )?;
            } else {
                queue!(
                    out,
                    SetForegroundColor(Color::DarkGrey),
                    Print(format!("{:>gutter$} │ ", index + 1)),
                    ResetColor,
                    Print(format!("{}\n", line))
                )?;
            }
        }
        queue!(out, Print(format!("{}\n", rule)))?;

        if let Some(narrative) = &self.narrative {
            queue!(out, Print(format!("{}\n", narrative.trim_end())))?;
        }

        if let Some(status) = &self.status {
            let color = match status.kind {
                StatusKind::Info => Color::Cyan,
                StatusKind::Transient => Color::Yellow,
                StatusKind::Persistent => Color::Red,
            };
            queue!(
                out,
                SetForegroundColor(color),
                Print(format!("  {}\n", status.text)),
                ResetColor
            )?;
        }
        out.flush()
    }
}

impl Surface for TerminalSurface {
    fn show_narrative(&mut self, text: &str) {
        self.narrative = Some(text.to_string());
        self.dirty = true;
    }

    fn show_status(&mut self, status: Option<StatusMessage>) {
        if self.status != status {
            self.status = status;
            self.dirty = true;
        }
    }

    fn status(&self) -> Option<StatusMessage> {
        self.status.clone()
    }

    fn line_element_count(&self) -> usize {
        let count = self.host.text().map_or(0, |text| text.lines().count());
        self.line_count.set(Some(count));
        count
    }

    fn highlight_element(&mut self, index: usize) -> bool {
        let count = match self.line_count.get() {
            Some(count) => count,
            None => self.line_element_count(),
        };
        if index < count {
            self.highlighted.insert(index);
            self.dirty = true;
            true
        } else {
            false
        }
    }

    fn clear_highlights(&mut self) {
        if !self.highlighted.is_empty() {
            self.highlighted.clear();
            self.dirty = true;
        }
    }

    fn highlighted_elements(&self) -> Vec<usize> {
        self.highlighted.iter().copied().collect()
    }

    fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(err) = self.render(&mut out) {
            debug!(error = %err, "terminal render failed");
        }
    }
}
