use crate::types::ErrorResponse;
use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No file uploaded, expected a multipart field named 'file'")]
    MissingFile,

    #[error("File must be an image (JPG, PNG, etc.)")]
    NotAnImage,

    #[error("Empty file uploaded")]
    EmptyFile,

    #[error("File size too large. Maximum size is {}MB", .0 / (1024 * 1024))]
    TooLarge(usize),

    #[error("max_length must be an integer between {min} and {max}")]
    InvalidMaxLength { min: usize, max: usize },

    #[error("Invalid multipart form: {0}")]
    InvalidForm(String),

    #[error("Error processing image: {0}")]
    Processing(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub(crate) fn from_multipart(e: MultipartError, max_bytes: usize) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::TooLarge(max_bytes)
        } else {
            ApiError::InvalidForm(e.body_text())
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::InvalidForm(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[test]
fn test_error_status_and_detail() {
    assert_eq!(ApiError::EmptyFile.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        ApiError::TooLarge(10 * 1024 * 1024).to_string(),
        "File size too large. Maximum size is 10MB"
    );

    let err = ApiError::from(anyhow::anyhow!("Error generating caption: bad png"));
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        err.to_string(),
        "Error processing image: Error generating caption: bad png"
    );
}
