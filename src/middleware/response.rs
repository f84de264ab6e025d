use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Success body: `{"data": ...}` plus any extra top-level fields.
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub status_code: StatusCode,
    /// Siblings of `data`, e.g. `upserted` on a sync batch.
    pub extra: Vec<(&'static str, Value)>,
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::with_status(data, StatusCode::OK)
    }

    pub fn created(data: T) -> Self {
        Self::with_status(data, StatusCode::CREATED)
    }

    pub fn with_status(data: T, status_code: StatusCode) -> Self {
        ApiResponse {
            data,
            status_code,
            extra: vec![],
        }
    }

    pub fn with_field(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.extra.push((key, value.into()));
        self
    }
}

impl ApiResponse<()> {
    /// 204 with an empty body.
    pub fn no_content() -> Self {
        Self::with_status((), StatusCode::NO_CONTENT)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        if self.status_code == StatusCode::NO_CONTENT {
            return StatusCode::NO_CONTENT.into_response();
        }

        let data = match serde_json::to_value(&self.data) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "Response body did not serialize");
                return ApiError::Internal("Failed to serialize response data".to_string()).into_response();
            }
        };

        let mut body = Map::with_capacity(1 + self.extra.len());
        body.insert("data".to_string(), data);
        body.extend(self.extra.into_iter().map(|(key, value)| (key.to_string(), value)));

        (self.status_code, Json(Value::Object(body))).into_response()
    }
}
