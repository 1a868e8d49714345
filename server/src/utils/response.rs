//! JSON envelope shared by every endpoint: `{success, data?, message?}` on
//! success and `{success: false, error: {code, message, details?}}` on failure.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize)]
struct Failure<'a> {
    success: bool,
    error: FailureBody<'a>,
}

#[derive(Serialize)]
struct FailureBody<'a> {
    code: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

fn reply<T: Serialize>(status: StatusCode, data: Option<T>, message: String) -> Response {
    let body = Envelope {
        success: true,
        data,
        message: Some(message),
    };
    (status, Json(body)).into_response()
}

pub fn success<T: Serialize>(data: T, message: impl Into<String>) -> Response {
    reply(StatusCode::OK, Some(data), message.into())
}

pub fn created<T: Serialize>(data: T, message: impl Into<String>) -> Response {
    reply(StatusCode::CREATED, Some(data), message.into())
}

pub fn empty_success(message: impl Into<String>) -> Response {
    reply::<()>(StatusCode::OK, None, message.into())
}

/// Credential images are per-user and must not be cached by intermediaries.
pub fn png(bytes: Vec<u8>) -> Response {
    let headers = [
        (header::CONTENT_TYPE, "image/png"),
        (header::CACHE_CONTROL, "private, no-store"),
    ];
    (StatusCode::OK, headers, bytes).into_response()
}

pub fn error(
    code: &str,
    message: impl Into<String>,
    details: Option<Value>,
    status: StatusCode,
) -> Response {
    let body = Failure {
        success: false,
        error: FailureBody {
            code,
            message: message.into(),
            details,
        },
    };
    (status, Json(body)).into_response()
}
