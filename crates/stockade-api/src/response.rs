//! Shared response envelope
//!
//! Every endpoint answers `{success, message, data?, errors?, meta}` so
//! clients parse one shape for both outcomes.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use stockade_core::Error;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
    pub meta: Meta,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    pub fn paginated(page: i64, limit: i64, total: i64, total_pages: i64) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
            total: Some(total),
            total_pages: Some(total_pages),
            ..Self::now()
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            errors: None,
            meta: Meta::now(),
        }
    }

    pub fn ok_with_meta(message: impl Into<String>, data: T, meta: Meta) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            errors: None,
            meta,
        }
    }
}

/// Wrapper turning core errors into the envelope with the right status
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Internals stay in the logs, not on the wire
        let message = if status.is_server_error() {
            tracing::error!(error = %self.0, category = self.0.category(), "Request failed");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ApiResponse::<()> {
            success: false,
            message,
            data: None,
            errors: Some(serde_json::json!({ "category": self.0.category() })),
            meta: Meta {
                status_code: Some(status.as_u16()),
                ..Meta::now()
            },
        };

        let mut response = (status, Json(body)).into_response();

        if let Error::RateLimited { retry_after_secs } = self.0 {
            if let Ok(value) = header::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Map validator output onto a 422 envelope with field details
pub fn validation_error(errors: &validator::ValidationErrors) -> ApiError {
    ApiError(Error::Validation(
        serde_json::to_string(errors).unwrap_or_else(|_| "Validation failed".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let response = ApiResponse::ok("created", serde_json::json!({"id": 1}));
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["message"], "created");
        assert_eq!(value["data"]["id"], 1);
        assert!(value["meta"]["timestamp"].is_i64());
        assert!(value["meta"].get("page").is_none());
    }

    #[test]
    fn test_paginated_meta_is_camel_case() {
        let meta = Meta::paginated(2, 20, 45, 3);
        let value = serde_json::to_value(&meta).unwrap();

        assert_eq!(value["page"], 2);
        assert_eq!(value["totalPages"], 3);
        assert!(value.get("total_pages").is_none());
    }
}
