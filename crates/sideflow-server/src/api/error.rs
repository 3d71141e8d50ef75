use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sideflow_core::{CoreError, ExecFailure};

/// HTTP-facing error with the taxonomy kind already mapped to a status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub partial_source: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            partial_source: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": {
                "code": self.status.as_u16(),
                "message": self.message,
            }
        });
        if let Some(source) = self.partial_source {
            body["partial_source"] = json!(source);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::InvalidId(_)
            | CoreError::MalformedScript(_)
            | CoreError::InvalidReference { .. }
            | CoreError::TemplateRender { .. }
            | CoreError::TemplateResource(_)
            | CoreError::BadLocator(_)
            | CoreError::UnboundVariable { .. } => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) | CoreError::NoSuchSession(_) => StatusCode::NOT_FOUND,
            CoreError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            CoreError::AlreadyHeld(_) | CoreError::NotOwner(_) => StatusCode::CONFLICT,
            CoreError::NoCapacity => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::GridUnreachable(_) => StatusCode::BAD_GATEWAY,
            CoreError::AssertionFailed { .. }
            | CoreError::CommandFailed { .. }
            | CoreError::Io(_)
            | CoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl From<ExecFailure> for ApiError {
    fn from(failure: ExecFailure) -> Self {
        let mut error = ApiError::from(failure.error);
        error.partial_source = failure.partial_source;
        error
    }
}
