use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// RFC 7807 problem body.
pub(crate) fn problem_response(
    status: StatusCode,
    title: &str,
    detail: Option<&str>,
) -> axum::response::Response {
    let mut body = json!({
        "type": "about:blank",
        "title": title,
        "status": status.as_u16(),
    });
    if let Some(detail) = detail {
        body["detail"] = json!(detail);
    }
    (status, Json(body)).into_response()
}

pub(crate) fn unauthorized(detail: Option<&str>) -> axum::response::Response {
    problem_response(StatusCode::UNAUTHORIZED, "Unauthorized", detail)
}

pub(crate) fn forbidden(detail: Option<&str>) -> axum::response::Response {
    problem_response(StatusCode::FORBIDDEN, "Forbidden", detail)
}
