use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

use crate::error::ClientError;
use crate::protocol::{
    self, AnalysisResult, AnalyzeRequest, ANALYZE_PATH, FIELD_IMAGE, IMAGE_FILE_NAME, IMAGE_MIME,
    POSES_PATH,
};

/// The remote pose-analysis service.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// `GET /api/poses`
    async fn list_poses(&self) -> Result<Vec<String>, ClientError>;

    /// `POST /api/analyze`
    async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalysisResult, ClientError>;
}

/// reqwest-backed client.
#[derive(Clone)]
pub struct HttpAnalysisClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await.map_err(|source| ClientError::Network {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| ClientError::Network {
            url: url.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                detail: protocol::error_detail(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ClientError::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn list_poses(&self) -> Result<Vec<String>, ClientError> {
        let url = self.url(POSES_PATH);
        let request = self.http.get(&url);
        self.send_json(url, request).await
    }

    async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalysisResult, ClientError> {
        let url = self.url(ANALYZE_PATH);

        let mut form = Form::new();
        for (name, value) in request.text_fields() {
            form = form.text(name, value);
        }
        let image = Part::bytes(request.jpeg)
            .file_name(IMAGE_FILE_NAME)
            .mime_str(IMAGE_MIME)
            .map_err(|e| ClientError::Request(e.to_string()))?;
        form = form.part(FIELD_IMAGE, image);

        let builder = self.http.post(&url).multipart(form);
        self.send_json(url, builder).await
    }
}
