use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::error::DetectError;
use crate::screenshots::ScreenshotLookupError;

pub const NO_IMAGE: &str = "No image data provided";
pub const INVALID_IMAGE: &str = "Invalid image data";
pub const NO_FRAMES: &str = "No frame data provided";
pub const NO_MODEL: &str = "No model loaded";
pub const NO_CAMERA_FRAME: &str = "No frame available from camera";

/// Error returned by handlers. Always rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

impl From<DetectError> for ApiError {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::ModelUnavailable => ApiError::Unavailable(NO_MODEL.to_string()),
            DetectError::Decode(_) => ApiError::BadRequest(INVALID_IMAGE.to_string()),
            DetectError::CameraUnavailable { .. } => ApiError::Unavailable(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ScreenshotLookupError> for ApiError {
    fn from(err: ScreenshotLookupError) -> Self {
        match err {
            ScreenshotLookupError::InvalidName => ApiError::BadRequest(err.to_string()),
            ScreenshotLookupError::NotFound => ApiError::NotFound(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        log::error!("request failed: {:#}", err);
        ApiError::Internal(format!("{:#}", err))
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_rt::test]
    async fn errors_render_as_json() -> anyhow::Result<()> {
        let response = ApiError::from(DetectError::Decode("bad".into())).error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body())
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let value: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(value["error"], INVALID_IMAGE);
        Ok(())
    }

    #[test]
    fn model_and_camera_faults_are_unavailable() {
        assert_eq!(
            ApiError::from(DetectError::ModelUnavailable).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(DetectError::camera(3, "busy")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ScreenshotLookupError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
