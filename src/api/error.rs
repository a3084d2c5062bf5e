//! Error responses.
//!
//! Every failure leaves as `{error, details?}` with a status matching its
//! category. Internal details are logged and only echoed for upstream and
//! server errors, never for authorization failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::Error;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                error: message.into(),
                details: None,
            },
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorBody {
                error: "Unauthorized".into(),
                details: None,
            },
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => ApiError::bad_request(msg),
            Error::Unauthorized(_) => ApiError::unauthorized(),
            e if e.is_upstream() => {
                warn!("Upstream failure surfaced to caller: {}", e);
                Self {
                    status: StatusCode::BAD_GATEWAY,
                    body: ErrorBody {
                        error: "Shipping rate service unavailable".into(),
                        details: Some(e.to_string()),
                    },
                }
            }
            e => {
                error!("Request failed: {}", e);
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: ErrorBody {
                        error: "Internal server error".into(),
                        details: Some(e.to_string()),
                    },
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
