//! Mode / pose / analysis state machine.
//!
//! Single owner: the session loop. Every user action and every response
//! goes through the methods here, so the invariants hold after each call:
//!
//! - a mode switch always leaves `result` empty
//! - manual mode with no pose never keeps a result past the next gate
//! - the auto pin is only cleared by a mode switch

use crate::config::StalePolicy;
use crate::protocol::{AnalysisResult, Mode};

/// Result of consulting the gate at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Open,
    /// Manual mode without a pose: nothing may be submitted
    Blocked,
}

/// Snapshot of the state a request was issued under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTag {
    pub generation: u64,
    pub mode: Mode,
    pub pose: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// Dropped under `StalePolicy::Discard`
    Stale,
}

#[derive(Debug, Clone, Default)]
pub struct ModeState {
    mode: Mode,
    pose: Option<String>,
    result: Option<AnalysisResult>,
    /// Bumped by every mode switch and pose change
    generation: u64,
}

impl ModeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn pose(&self) -> Option<&str> {
        self.pose.as_deref()
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_blocked(&self) -> bool {
        match self.mode {
            Mode::Manual => self.pose.is_none(),
            Mode::Auto => false,
        }
    }

    /// Drops the result and the auto pin; the next auto result pins again.
    pub fn switch_to_auto(&mut self) {
        self.mode = Mode::Auto;
        self.pose = None;
        self.result = None;
        self.generation += 1;
    }

    pub fn switch_to_manual(&mut self) {
        self.mode = Mode::Manual;
        self.pose = None;
        self.result = None;
        self.generation += 1;
    }

    /// Ignored in auto mode. Returns whether the selection was accepted.
    pub fn select_pose(&mut self, pose: &str) -> bool {
        match self.mode {
            Mode::Auto => false,
            Mode::Manual => {
                if self.pose.as_deref() != Some(pose) {
                    self.pose = Some(pose.to_string());
                    self.generation += 1;
                }
                true
            }
        }
    }

    /// Overwrites the result. In auto mode with nothing pinned yet, pins the
    /// detected pose.
    pub fn apply_result(&mut self, result: AnalysisResult) {
        if self.mode == Mode::Auto && self.pose.is_none() {
            tracing::info!("[state] pinned auto pose {}", result.pose_name);
            self.pose = Some(result.pose_name.clone());
        }
        self.result = Some(result);
    }

    /// Like `apply_result`, but under `Discard` drops results whose request
    /// was issued before the latest mode switch or pose change.
    pub fn apply_tagged(&mut self, tag: &RequestTag, result: AnalysisResult, policy: StalePolicy) -> Applied {
        if policy == StalePolicy::Discard && !self.is_current(tag) {
            tracing::debug!(
                "[state] dropping stale result (issued gen {}, now {})",
                tag.generation,
                self.generation
            );
            return Applied::Stale;
        }
        self.apply_result(result);
        Applied::Applied
    }

    /// Called once per tick before anything else.
    pub fn gate(&mut self) -> Gate {
        if self.is_blocked() {
            self.result = None;
            Gate::Blocked
        } else {
            Gate::Open
        }
    }

    pub fn tag(&self) -> RequestTag {
        RequestTag {
            generation: self.generation,
            mode: self.mode,
            pose: self.pose.clone(),
        }
    }

    pub fn is_current(&self, tag: &RequestTag) -> bool {
        tag.generation == self.generation
    }
}
