// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Prometheus metrics for the sidecar.
//!
//! The recorder is process-wide: it is installed once by [`init_metrics`] and
//! the returned handle is injected into the operational router, which renders
//! it on `/__/metrics`.

use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::errors::SidecarError;

// ============================================================================
// Metric Names
// ============================================================================

pub const EXPIRY_TIMESTAMP: &str = "vkcc_sidecar_expiry_timestamp_seconds";
pub const RENEWALS_TOTAL: &str = "vkcc_sidecar_renewals_total";
pub const ERRORS_TOTAL: &str = "vkcc_sidecar_errors_total";

pub const VAULT_REQUESTS_TOTAL: &str = "vkcc_sidecar_vault_requests_total";
pub const VAULT_REQUEST_DURATION: &str = "vkcc_sidecar_vault_request_duration_seconds";
pub const VAULT_IN_FLIGHT: &str = "vkcc_sidecar_vault_in_flight_requests";

pub const REQUESTS_TOTAL: &str = "vkcc_sidecar_requests_total";
pub const REQUEST_DURATION: &str = "vkcc_sidecar_request_duration_seconds";
pub const IN_FLIGHT: &str = "vkcc_sidecar_in_flight_requests";

// ============================================================================
// Prometheus Recorder
// ============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder.
///
/// Safe to call more than once; later calls return the handle installed by
/// the first one.
pub fn init_metrics() -> Result<PrometheusHandle, SidecarError> {
    static INSTALL: Mutex<()> = Mutex::new(());

    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let _guard = INSTALL.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SidecarError::ConfigError(format!("unable to install metrics recorder: {e}")))?;

    describe_gauge!(
        EXPIRY_TIMESTAMP,
        "Returns the expiry date for the current credentials, expressed as a Unix Epoch Time"
    );
    describe_counter!(RENEWALS_TOTAL, "Total count of renewals");
    describe_counter!(ERRORS_TOTAL, "Total count of errors");
    describe_counter!(VAULT_REQUESTS_TOTAL, "Total count of requests to Vault, by code and method");
    describe_histogram!(VAULT_REQUEST_DURATION, "A histogram of request latencies to Vault");
    describe_gauge!(VAULT_IN_FLIGHT, "Number of requests to Vault currently in-flight");
    describe_counter!(REQUESTS_TOTAL, "Total count of requests served, by code and method");
    describe_histogram!(REQUEST_DURATION, "A histogram of latencies for requests served");
    describe_gauge!(IN_FLIGHT, "Number of requests currently being served");

    tracing::info!("[sidecar] prometheus metrics recorder initialized");

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

// ============================================================================
// Renewal Metrics
// ============================================================================

pub fn record_renewal(expires_at_unix: i64) {
    counter!(RENEWALS_TOTAL).increment(1);
    gauge!(EXPIRY_TIMESTAMP).set(expires_at_unix as f64);
}

pub fn record_error() {
    counter!(ERRORS_TOTAL).increment(1);
}

// ============================================================================
// Vault Client Metrics
// ============================================================================

pub fn record_vault_request(method: &str, code: &str, duration: Duration) {
    let labels = [("code", code.to_string()), ("method", method.to_string())];
    counter!(VAULT_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(VAULT_REQUEST_DURATION).record(duration.as_secs_f64());
}

/// Tracks one in-flight vault request for as long as it is alive.
pub struct VaultInFlight;

impl VaultInFlight {
    pub fn start() -> Self {
        gauge!(VAULT_IN_FLIGHT).increment(1.0);
        Self
    }
}

impl Drop for VaultInFlight {
    fn drop(&mut self) {
        gauge!(VAULT_IN_FLIGHT).decrement(1.0);
    }
}

// ============================================================================
// Metrics Middleware
// ============================================================================

/// Middleware recording `requests_total{code,method}`,
/// `request_duration_seconds{code,method}` and the in-flight gauge for the
/// provider listener.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();

    gauge!(IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(IN_FLIGHT).decrement(1.0);

    let labels = [
        ("code", response.status().as_u16().to_string()),
        ("method", method),
    ];
    counter!(REQUESTS_TOTAL, &labels).increment(1);
    histogram!(REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());

    response
}
