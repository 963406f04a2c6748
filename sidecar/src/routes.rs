// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Operational HTTP handlers.
//!
//! Served on the ops listener, which starts before the sidecar has a session
//! or credentials and is never gated on either.
//!
//! | Method | Path | Handler | Description |
//! |--------|------|---------|-------------|
//! | GET | `/__/about` | [`about`] | Name, description and version |
//! | GET | `/__/health` | [`health`] | Liveness |
//! | GET | `/__/ready` | [`ready`] | Readiness |
//! | GET | `/__/metrics` | [`metrics`] | Prometheus exposition |

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;

use crate::constants::{APP_DESCRIPTION, APP_NAME};

pub fn ops_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/__/about", get(about))
        .route("/__/health", get(health))
        .route("/__/ready", get(ready))
        .route("/__/metrics", get(metrics))
        .with_state(handle)
}

/// About endpoint.
///
/// # Response
///
/// ```json
/// {"name": "vault-kube-cloud-credentials", "description": "...", "version": "0.1.0"}
/// ```
pub async fn about() -> impl IntoResponse {
    Json(json!({
        "name": APP_NAME,
        "description": APP_DESCRIPTION,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check endpoint.
///
/// The process is healthy for as long as it is able to answer.
///
/// # Response
///
/// ```json
/// {"health": "healthy"}
/// ```
pub async fn health() -> impl IntoResponse {
    Json(json!({"health": "healthy"}))
}

pub async fn ready() -> impl IntoResponse {
    (StatusCode::OK, "ready\n")
}

#[tracing::instrument(skip(handle))]
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
