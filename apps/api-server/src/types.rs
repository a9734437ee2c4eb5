use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CaptionResponse {
    pub caption: String,
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
}

/// Body of every 4xx/5xx answer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    pub detail: String,
}
