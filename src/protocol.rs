//! Request/response shapes of the pose-analysis HTTP service.
//!
//! Self-contained: no imports from other pose_coach modules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const POSES_PATH: &str = "/api/poses";
pub const ANALYZE_PATH: &str = "/api/analyze";

/// Multipart field names of `POST /api/analyze`
pub const FIELD_IMAGE: &str = "image";
pub const FIELD_MODE: &str = "mode";
pub const FIELD_POSE_NAME: &str = "pose_name";

pub const IMAGE_FILE_NAME: &str = "frame.jpg";
pub const IMAGE_MIME: &str = "image/jpeg";

/// Who picks the target pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The service picks the closest pose
    #[default]
    Auto,
    /// The user pins the pose
    Manual,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Manual => "manual",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service verdict for one frame. Replaced wholesale by every new response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub pose_name: String,
    /// Mean angle deviation in degrees; lower is better
    pub score: f64,
    /// Display order matters
    pub hints: Vec<String>,
    /// Joint label -> degrees
    pub angles: HashMap<String, f64>,
}

/// One outbound analysis request.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeRequest {
    pub jpeg: Vec<u8>,
    pub mode: Mode,
    /// Only ever set in manual mode
    pub pose_name: Option<String>,
}

impl AnalyzeRequest {
    /// `pose` is dropped unless `mode` is manual.
    pub fn new(jpeg: Vec<u8>, mode: Mode, pose: Option<&str>) -> Self {
        let pose_name = match mode {
            Mode::Manual => pose.map(str::to_string),
            Mode::Auto => None,
        };
        Self { jpeg, mode, pose_name }
    }

    /// Text fields in the order they go on the wire.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![(FIELD_MODE, self.mode.as_str().to_string())];
        if let Some(pose) = &self.pose_name {
            fields.push((FIELD_POSE_NAME, pose.clone()));
        }
        fields
    }
}

/// FastAPI-style error body, `{"detail": "..."}`.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub detail: serde_json::Value,
}

/// Best-effort human-readable detail from an error response body.
pub fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { detail: serde_json::Value::String(s) }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.chars().take(200).collect(),
    }
}
