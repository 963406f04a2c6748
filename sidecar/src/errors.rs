// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;
use std::time::Duration;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum SidecarError {
    #[error("unable to read identity token from {path:?}: {source}")]
    TokenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("vault request to {path} failed: {source}")]
    VaultTransport {
        path: String,
        source: reqwest::Error,
    },
    #[error("vault returned {status} for {path}: {}", .errors.join(", "))]
    VaultStatus {
        path: String,
        status: StatusCode,
        errors: Vec<String>,
    },
    #[error("malformed vault response from {path}: {reason}")]
    MalformedResponse { path: String, reason: String },
    #[error("unable to load vault CA: {0}")]
    CaLoad(String),
    #[error("unable to decode service account key: {0}")]
    KeyDecode(String),
    #[error("unable to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[error("{listener} listener did not drain within {timeout:?}")]
    ShutdownTimeout {
        listener: &'static str,
        timeout: Duration,
    },
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SidecarError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Error body served on the AWS `/credentials` endpoint.
///
/// The code is the canonical reason phrase with the spaces removed, so a
/// `404` becomes `NotFound`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwsError {
    pub code: String,
    pub message: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl AwsError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status
                .canonical_reason()
                .unwrap_or_default()
                .replace(' ', ""),
            message: message.into(),
            status,
        }
    }
}

impl IntoResponse for AwsError {
    fn into_response(self) -> Response {
        json_error(self.status, &self)
    }
}

/// Error body served by the GCE metadata emulation when the caller expects JSON.
///
/// The error is the reason phrase in snake case, so a `404` becomes `not_found`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GcpError {
    pub error: String,
    pub error_description: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl GcpError {
    pub fn new(status: StatusCode, description: impl Into<String>) -> Self {
        Self {
            error: status
                .canonical_reason()
                .unwrap_or_default()
                .to_lowercase()
                .replace(' ', "_"),
            error_description: description.into(),
            status,
        }
    }
}

impl IntoResponse for GcpError {
    fn into_response(self) -> Response {
        json_error(self.status, &self)
    }
}

fn json_error<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(mut bytes) => {
            bytes.push(b'\n');
            (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        Err(e) => {
            tracing::error!("[sidecar] unable to encode error body: {:?}", e);
            status.into_response()
        }
    }
}

/// Plain-text error for metadata leaves that answer with `application/text`.
pub fn text_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        format!("{message}\n"),
    )
        .into_response()
}
