//! Pure rendering of `ModeState` for the console.

use std::fmt::Write as _;

use crate::catalog::PosesCatalog;
use crate::protocol::Mode;
use crate::state::ModeState;

pub const DETECTING: &str = "Detecting...";
pub const NO_SCORE: &str = "--";
pub const NO_HINTS: &str = "No hints yet";
pub const SELECT_POSE: &str = "Select a pose to begin";
pub const ALL_GOOD: &str = "All joints within range";

/// The service counts an attempt as successful below this score.
pub const SUCCESS_SCORE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub mode: Mode,
    /// Pose selected in manual mode or pinned in auto mode
    pub target: Option<String>,
    pub status: String,
    pub score: String,
    pub matched: bool,
    pub hints: Vec<String>,
    /// (humanized joint label, degrees), sorted by raw label
    pub angles: Vec<(String, String)>,
    pub poses: Vec<String>,
}

impl View {
    pub fn build(state: &ModeState, catalog: &PosesCatalog) -> Self {
        let poses = catalog.poses().to_vec();
        let target = state.pose().map(str::to_string);

        let Some(result) = state.result() else {
            let status = if state.is_blocked() { SELECT_POSE } else { DETECTING };
            return Self {
                mode: state.mode(),
                target,
                status: status.to_string(),
                score: NO_SCORE.to_string(),
                matched: false,
                hints: vec![NO_HINTS.to_string()],
                angles: Vec::new(),
                poses,
            };
        };

        let hints = if result.hints.is_empty() {
            vec![ALL_GOOD.to_string()]
        } else {
            result.hints.clone()
        };

        let mut labels: Vec<&String> = result.angles.keys().collect();
        labels.sort();
        let angles = labels
            .into_iter()
            .map(|label| (humanize(label), format!("{:.1}°", result.angles[label])))
            .collect();

        Self {
            mode: state.mode(),
            target,
            status: result.pose_name.clone(),
            score: format_score(result.score),
            matched: result.score < SUCCESS_SCORE,
            hints,
            angles,
            poses,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let target = self.target.as_deref().unwrap_or("-");
        let _ = writeln!(out, "[{}] target: {}", self.mode, target);
        let _ = writeln!(out, "Pose:  {}", self.status);
        let mark = if self.matched { "  (matched)" } else { "" };
        let _ = writeln!(out, "Score: {}{}", self.score, mark);
        let _ = writeln!(out, "Hints:");
        for hint in &self.hints {
            let _ = writeln!(out, "  - {hint}");
        }
        if !self.angles.is_empty() {
            let _ = writeln!(out, "Angles:");
            for (label, value) in &self.angles {
                let _ = writeln!(out, "  {label:<16}{value:>8}");
            }
        }
        out
    }
}

pub fn format_score(score: f64) -> String {
    format!("{score:.1}")
}

/// `left_knee` -> `Left Knee`
pub fn humanize(label: &str) -> String {
    label
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
