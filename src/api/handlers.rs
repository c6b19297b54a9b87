use crate::error::NfeError;
use crate::models::{ConfirmOptions, InvoiceStatus, LineRef};
use crate::service::{CodeGenerator, NfeEntryService, UploadTarget};
use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Header set by the authorization layer in front of the service
pub const STORE_SCOPE_HEADER: &str = "x-store-id";

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub store_id: i64,
    pub supplier_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PreviewRequest {
    pub supplier_id: Option<i64>,
}

/// Response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved_lines: Option<Vec<LineRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<InvoiceStatus>,
}

impl NfeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            NfeError::MalformedInput(_) | NfeError::UnresolvedLines(_) => StatusCode::BAD_REQUEST,
            NfeError::DuplicateInvoice { .. } | NfeError::IllegalTransition { .. } => {
                StatusCode::CONFLICT
            }
            NfeError::ReferenceNotFound { .. } => StatusCode::NOT_FOUND,
            NfeError::Forbidden { .. } => StatusCode::FORBIDDEN,
            NfeError::Database(_) | NfeError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            NfeError::MalformedInput(_) => "malformed_input",
            NfeError::DuplicateInvoice { .. } => "duplicate_invoice",
            NfeError::UnresolvedLines(_) => "unresolved_lines",
            NfeError::IllegalTransition { .. } => "illegal_transition",
            NfeError::ReferenceNotFound { .. } => "not_found",
            NfeError::Forbidden { .. } => "forbidden",
            NfeError::Database(_) | NfeError::Migration(_) => "internal",
        }
    }
}

impl IntoResponse for NfeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let mut body = ErrorResponse {
            success: false,
            message: format!("Error: {}", self),
            error: self.code(),
            existing_id: None,
            unresolved_lines: None,
            status: None,
        };
        match self {
            NfeError::DuplicateInvoice { existing_id, .. } => body.existing_id = Some(existing_id),
            NfeError::UnresolvedLines(lines) => body.unresolved_lines = Some(lines),
            NfeError::IllegalTransition { from, .. } => body.status = Some(from),
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

/// Caller's store from the scope header; absent means unscoped.
pub fn store_scope(headers: &HeaderMap) -> Result<Option<i64>, NfeError> {
    match headers.get(STORE_SCOPE_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(Some)
            .ok_or_else(|| NfeError::MalformedInput(format!("invalid {} header", STORE_SCOPE_HEADER))),
    }
}

/// Health check
pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn upload_entry(
    State(service): State<Arc<NfeEntryService>>,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Response, NfeError> {
    let target = UploadTarget {
        store_id: query.store_id,
        supplier_id: query.supplier_id,
        scope: store_scope(&headers)?,
    };
    let detail = service.upload(target, &body).await?;
    let message = format!(
        "Imported invoice {} with {} lines",
        detail.entry.access_key,
        detail.lines.len()
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message, detail))).into_response())
}

pub async fn list_entries(
    State(service): State<Arc<NfeEntryService>>,
    headers: HeaderMap,
) -> Result<Response, NfeError> {
    let entries = service.list(store_scope(&headers)?).await?;
    let message = format!("{} entries", entries.len());
    Ok(Json(ApiResponse::ok(message, entries)).into_response())
}

pub async fn get_entry(
    State(service): State<Arc<NfeEntryService>>,
    headers: HeaderMap,
    Path(entry_id): Path<i64>,
) -> Result<Response, NfeError> {
    let detail = service.get(entry_id, store_scope(&headers)?).await?;
    Ok(Json(ApiResponse::ok("OK", detail)).into_response())
}

pub async fn preview_entry(
    State(service): State<Arc<NfeEntryService>>,
    Path(entry_id): Path<i64>,
    request: Option<Json<PreviewRequest>>,
) -> Result<Response, NfeError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let report = service.preview(entry_id, request.supplier_id).await?;
    let message = format!(
        "{} of {} lines resolved",
        report.resolved_lines, report.total_lines
    );
    Ok(Json(ApiResponse::ok(message, report)).into_response())
}

pub async fn confirm_entry(
    State(service): State<Arc<NfeEntryService>>,
    Path(entry_id): Path<i64>,
    Json(options): Json<ConfirmOptions>,
) -> Result<Response, NfeError> {
    let outcome = service.confirm(entry_id, options).await?;
    let message = format!(
        "Posted {} lines, {} SKUs updated",
        outcome.lines_created, outcome.skus_updated
    );
    Ok(Json(ApiResponse::ok(message, outcome)).into_response())
}

pub async fn cancel_entry(
    State(service): State<Arc<NfeEntryService>>,
    Path(entry_id): Path<i64>,
) -> Result<Response, NfeError> {
    let outcome = service.cancel(entry_id).await?;
    Ok(Json(ApiResponse::ok("Entry cancelled", outcome)).into_response())
}

pub async fn next_ean(State(codes): State<Arc<CodeGenerator>>) -> Result<Response, NfeError> {
    let code = codes.next_ean13().await?;
    Ok(Json(ApiResponse::ok(code.ean13.clone(), code)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn errors_map_to_http_status() {
        let cases = [
            (NfeError::MalformedInput("x".into()), StatusCode::BAD_REQUEST),
            (NfeError::UnresolvedLines(vec![]), StatusCode::BAD_REQUEST),
            (
                NfeError::DuplicateInvoice {
                    access_key: "K".into(),
                    existing_id: 3,
                },
                StatusCode::CONFLICT,
            ),
            (
                NfeError::IllegalTransition {
                    from: InvoiceStatus::Posted,
                    to: InvoiceStatus::Posted,
                },
                StatusCode::CONFLICT,
            ),
            (NfeError::not_found("sku", 1), StatusCode::NOT_FOUND),
            (NfeError::Forbidden { store_id: 2 }, StatusCode::FORBIDDEN),
            (
                NfeError::Database(sqlx::Error::RowNotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{err}");
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn scope_header_is_optional_but_must_be_numeric() {
        let mut headers = HeaderMap::new();
        assert_eq!(store_scope(&headers).unwrap(), None);

        headers.insert(STORE_SCOPE_HEADER, HeaderValue::from_static("12"));
        assert_eq!(store_scope(&headers).unwrap(), Some(12));

        headers.insert(STORE_SCOPE_HEADER, HeaderValue::from_static("abc"));
        assert!(matches!(store_scope(&headers), Err(NfeError::MalformedInput(_))));
    }
}
