use serde::{Deserialize, Serialize};

/// Response envelope used by every import endpoint upstream.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub status: bool,
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct TokenData {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct TourStatusData {
    #[serde(default)]
    pub flag: bool,
    pub tour_slug: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateTourPayload<'a, F: Serialize> {
    pub agent_id: u64,
    pub data: &'a F,
}

#[derive(Debug, Serialize)]
pub struct UploadFilePayload<'a> {
    pub agent_id: u64,
    pub file_path: &'a str,
    pub custom_prompt: &'a str,
}

#[derive(Debug, Serialize)]
pub struct TourStatusPayload<'a> {
    pub token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(error: &str, detail: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            detail: Some(detail.into()),
        }
    }
}
