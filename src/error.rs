use thiserror::Error;

/// Camera acquisition and capture failures.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    #[error("camera {index} is not available: {reason}")]
    DeviceUnavailable { index: i32, reason: String },
    #[error("capture failed: {0}")]
    Capture(String),
}

/// Failures talking to the analysis service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}: {detail}")]
    Status {
        url: String,
        status: u16,
        detail: String,
    },
    #[error("invalid response body from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("failed to build request: {0}")]
    Request(String),
}

impl ClientError {
    /// HTTP status for `Status` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}
