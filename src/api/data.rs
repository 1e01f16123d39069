//! Data endpoint

use crate::api::telemetry::ResponseTags;
use crate::api::ApiState;
use crate::query::LogicalQuery;
use crate::Error;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub class: &'static str,
}

/// HTTP status for a failed request.
pub fn error_status(error: &Error) -> StatusCode {
    match error {
        Error::Resolution(_) | Error::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        Error::PartialData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::WeightExceeded { .. } => StatusCode::INSUFFICIENT_STORAGE,
        Error::BackendRejected(_) | Error::Transport(_) => StatusCode::BAD_GATEWAY,
        Error::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
        Error::Cache(_)
        | Error::Metadata(_)
        | Error::Serialization(_)
        | Error::Config(_)
        | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            class: self.error_class(),
        };
        let mut response = (error_status(&self), Json(body)).into_response();
        response.extensions_mut().insert(ResponseTags {
            error_class: Some(self.error_class()),
            partial: false,
        });
        response
    }
}

/// `POST /v1/data`
pub async fn execute(
    State(state): State<ApiState>,
    payload: Result<Json<LogicalQuery>, JsonRejection>,
) -> Response {
    let query = match payload {
        Ok(Json(query)) => query,
        Err(rejection) => {
            return Error::InvalidQuery(rejection.body_text()).into_response();
        }
    };
    match state.pipeline.execute(query).await {
        Ok(result) => {
            let partial = result.is_partial();
            let mut response = Json(result).into_response();
            response.extensions_mut().insert(ResponseTags {
                error_class: None,
                partial,
            });
            response
        }
        Err(e) => e.into_response(),
    }
}
