//! Visibility gate
//!
//! Analysis only runs for a surface the user has explicitly opened, that is
//! not minimized, and whose container is present. The state is shared between
//! the controller and in-flight analysis tasks, which re-check it right before
//! calling out.

use crate::messages::SurfaceMessage;
use serde::Serialize;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisibilityState {
    pub explicitly_activated: bool,
    pub minimized: bool,
    pub widget_present: bool,
}

impl VisibilityState {
    pub fn should_proceed(&self) -> bool {
        self.explicitly_activated && !self.minimized && self.widget_present
    }

    /// Apply a surface message. Returns true if the state changed.
    pub fn apply(&mut self, message: &SurfaceMessage) -> bool {
        let before = *self;
        match message {
            SurfaceMessage::Activate => {
                self.explicitly_activated = true;
                self.widget_present = true;
                self.minimized = false;
            }
            SurfaceMessage::Minimize => self.minimized = true,
            SurfaceMessage::Restore => self.minimized = false,
            SurfaceMessage::Close => self.widget_present = false,
            SurfaceMessage::Reopen => self.widget_present = true,
            SurfaceMessage::Navigate { .. } | SurfaceMessage::Shutdown => {
                *self = VisibilityState::default();
            }
        }
        *self != before
    }
}

/// Shared handle to the process-wide visibility state.
#[derive(Debug, Clone, Default)]
pub struct VisibilityGate {
    inner: Arc<Mutex<VisibilityState>>,
}

impl VisibilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut VisibilityState) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn should_proceed(&self) -> bool {
        self.with_state(|state| state.should_proceed())
    }

    pub fn snapshot(&self) -> VisibilityState {
        self.with_state(|state| *state)
    }

    pub fn apply(&self, message: &SurfaceMessage) -> bool {
        self.with_state(|state| state.apply(message))
    }

    /// Back to never-activated, not minimized, no widget.
    pub fn reset(&self) {
        self.with_state(|state| *state = VisibilityState::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_blocks() {
        let gate = VisibilityGate::new();
        assert_eq!(gate.snapshot(), VisibilityState::default());
        assert!(!gate.should_proceed());
    }

    #[test]
    fn test_not_activated_blocks_regardless_of_other_fields() {
        let state = VisibilityState {
            explicitly_activated: false,
            minimized: false,
            widget_present: true,
        };
        assert!(!state.should_proceed());
    }

    #[test]
    fn test_activation_lifecycle() {
        let gate = VisibilityGate::new();
        assert!(gate.apply(&SurfaceMessage::Activate));
        assert!(gate.should_proceed());

        gate.apply(&SurfaceMessage::Minimize);
        assert!(!gate.should_proceed());
        gate.apply(&SurfaceMessage::Restore);
        assert!(gate.should_proceed());

        gate.apply(&SurfaceMessage::Close);
        assert!(!gate.should_proceed());
        gate.apply(&SurfaceMessage::Reopen);
        assert!(gate.should_proceed());
    }

    #[test]
    fn test_restore_without_activation_still_blocks() {
        let gate = VisibilityGate::new();
        gate.apply(&SurfaceMessage::Reopen);
        gate.apply(&SurfaceMessage::Restore);
        assert!(!gate.should_proceed());
    }

    #[test]
    fn test_navigation_resets() {
        let gate = VisibilityGate::new();
        gate.apply(&SurfaceMessage::Activate);
        gate.apply(&SurfaceMessage::Navigate {
            location: "https://leetcode.com/problems/3sum/".to_string(),
        });
        assert_eq!(gate.snapshot(), VisibilityState::default());

        gate.apply(&SurfaceMessage::Activate);
        gate.reset();
        assert!(!gate.should_proceed());
    }

    #[test]
    fn test_apply_reports_changes() {
        let mut state = VisibilityState::default();
        assert!(!state.apply(&SurfaceMessage::Restore));
        assert!(state.apply(&SurfaceMessage::Minimize));
        assert!(!state.apply(&SurfaceMessage::Minimize));
    }
}
