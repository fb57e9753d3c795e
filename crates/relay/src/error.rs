// HTTP-level errors: anything refused before a websocket upgrade.

use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// A room could not be resolved for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("room id must be 1 to {max} characters long, got {len}")]
    RoomIdLength { len: usize, max: usize },
    #[error("room id contains {found:?}; only letters, digits, '-', '_' and '.' are allowed")]
    RoomIdCharacter { found: char },
}

/// Error body returned by the relay's HTTP surface:
/// `{"error": {"code", "message", "retryable", "request_id", "room"?}}`.
#[derive(Debug, Clone)]
pub struct RelayError {
    status: StatusCode,
    code: &'static str,
    message: String,
    room: Option<String>,
}

impl RelayError {
    /// The requested room id can never be served. Clients treat this as final.
    pub fn invalid_room(room: &str, error: &RegistryError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_ROOM_ID",
            message: error.to_string(),
            room: Some(room.to_owned()),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR",
            message: "internal server error".to_owned(),
            room: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn retryable(&self) -> bool {
        self.status.is_server_error()
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let request_id = current_request_id();
        let mut error = json!({
            "code": self.code,
            "message": self.message,
            "retryable": self.retryable(),
            "request_id": request_id,
        });
        if let Some(room) = self.room {
            error["room"] = json!(room);
        }

        let mut response = (self.status, Json(json!({ "error": error }))).into_response();
        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }
        response
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}
