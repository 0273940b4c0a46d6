//! Prometheus text exposition endpoint

use axum::http::header;
use axum::response::IntoResponse;

use crate::http::AppResult;

pub async fn metrics() -> AppResult<impl IntoResponse> {
    let text = taskio_core::metrics::gather_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    ))
}
