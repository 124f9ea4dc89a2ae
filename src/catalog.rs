use crate::client::AnalysisService;

/// Pose identifiers offered by the service. Loaded once, never refreshed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PosesCatalog {
    poses: Vec<String>,
}

impl PosesCatalog {
    pub fn new(poses: Vec<String>) -> Self {
        Self { poses }
    }

    /// A failed fetch is logged and yields an empty catalog.
    pub async fn load<S: AnalysisService + ?Sized>(service: &S) -> Self {
        match service.list_poses().await {
            Ok(poses) => {
                tracing::info!("[catalog] {} poses available", poses.len());
                Self::new(poses)
            }
            Err(e) => {
                tracing::warn!("[catalog] pose list unavailable: {e}");
                Self::default()
            }
        }
    }

    pub fn poses(&self) -> &[String] {
        &self.poses
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn contains(&self, pose: &str) -> bool {
        self.poses.iter().any(|p| p == pose)
    }
}
