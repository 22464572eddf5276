use super::config::ImportConfig;
use super::form::{PlanTripForm, UploadImportRequest};
use crate::http::{HttpTimeouts, build_client};
use crate::models::{
    Envelope, GenerateTourPayload, TokenData, TourStatusData, TourStatusPayload, UploadFilePayload,
};
use crate::wait::{JobStatus, StatusSource};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

const GENERIC_REJECTION: &str = "Unable to process your request. Please try again.";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Rejected(String),
}

/// Client for the import pipeline: job submission, job status and history.
#[derive(Debug, Clone)]
pub struct ImportClient {
    http: Client,
    config: ImportConfig,
}

impl ImportClient {
    pub fn new(config: ImportConfig) -> Self {
        Self {
            http: build_client(HttpTimeouts::from_env()),
            config,
        }
    }

    /// Submits a "Plan Your Trip" form. Returns the job token.
    pub async fn generate_tour(
        &self,
        agent_id: u64,
        form: &PlanTripForm,
    ) -> Result<String, ImportError> {
        let body = GenerateTourPayload {
            agent_id,
            data: form,
        };
        let envelope: Envelope<TokenData> =
            self.post("/api/import/generate_tour", Some(&body)).await?;
        let token = take_token(envelope)?;
        info!(
            target = "travelone.import",
            agent_id,
            token = %token,
            "tour generation submitted"
        );
        Ok(token)
    }

    /// Submits an uploaded document for import. Returns the job token.
    pub async fn upload_file(
        &self,
        agent_id: u64,
        request: &UploadImportRequest,
    ) -> Result<String, ImportError> {
        let body = UploadFilePayload {
            agent_id,
            file_path: &request.file_path,
            custom_prompt: &request.custom_prompt,
        };
        let envelope: Envelope<TokenData> =
            self.post("/api/import/upload_file", Some(&body)).await?;
        let token = take_token(envelope)?;
        info!(
            target = "travelone.import",
            agent_id,
            token = %token,
            "file import submitted"
        );
        Ok(token)
    }

    pub async fn tour_status(&self, token: &str) -> Result<JobStatus, ImportError> {
        let envelope: Envelope<TourStatusData> = self
            .post("/api/import/tour_status", Some(&TourStatusPayload { token }))
            .await?;
        if !envelope.status {
            return Ok(JobStatus::Pending);
        }
        let Some(data) = envelope.data.filter(|d| d.flag) else {
            return Ok(JobStatus::Pending);
        };
        match data.tour_slug.map(|s| s.trim().to_string()) {
            Some(slug) if !slug.is_empty() => Ok(JobStatus::Ready { slug }),
            _ => Err(ImportError::InvalidResponse(
                "ready flag without tour_slug".into(),
            )),
        }
    }

    /// Past imports of the agent, as returned upstream.
    pub async fn list_imports(&self) -> Result<Vec<Value>, ImportError> {
        let envelope: Envelope<Vec<Value>> = self.post("/api/import/list", None::<&()>).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    async fn post<B, T>(&self, path: &str, body: Option<&B>) -> Result<Envelope<T>, ImportError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url, path);
        let mut request = self.http.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ImportError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ImportError::Status(response.status().as_u16()));
        }

        let envelope = response
            .json::<Envelope<T>>()
            .await
            .map_err(|err| ImportError::InvalidResponse(err.to_string()))?;
        debug!(
            target = "travelone.import",
            path,
            status = envelope.status,
            "upstream replied"
        );
        Ok(envelope)
    }
}

fn take_token(envelope: Envelope<TokenData>) -> Result<String, ImportError> {
    if !envelope.status {
        let message = envelope
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| GENERIC_REJECTION.to_string());
        return Err(ImportError::Rejected(message));
    }
    envelope
        .data
        .map(|d| d.token.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ImportError::InvalidResponse("missing data.token".into()))
}

#[async_trait]
impl StatusSource for ImportClient {
    async fn check_status(&self, token: &str) -> eyre::Result<JobStatus> {
        Ok(self.tour_status(token).await?)
    }
}
