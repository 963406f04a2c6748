// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! GCE metadata server emulation.
//!
//! Google client libraries probe several paths of the metadata server before
//! they trust it with token requests, so the subset served here has to match
//! the real server byte for byte: plain-text leaves are answered as
//! `application/text` without a trailing newline, JSON bodies end with one.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::constants::{
    DEFAULT_SERVICE_ACCOUNT, METADATA_FLAVOR, METADATA_FLAVOR_HEADER, NUMERIC_PROJECT_ID,
    SERVICE_ACCOUNT_ENTRIES,
};
use crate::errors::{GcpError, text_error};
use crate::models::{GceMetadata, GcpTokenCredential};
use crate::slot::Slot;

const TEXT_CONTENT_TYPE: &str = "application/text";
const METADATA_NOT_INITIALIZED: &str = "Metadata not initialized";

/// The token and the metadata describing the account it belongs to,
/// published together so that a reader never pairs a token with the metadata
/// of another fetch.
#[derive(Debug, Clone)]
pub struct MetadataSnapshot {
    pub credential: GcpTokenCredential,
    pub metadata: GceMetadata,
}

pub type MetadataState = Arc<Slot<MetadataSnapshot>>;

type QueryPairs = Result<Query<Vec<(String, String)>>, QueryRejection>;

pub fn router(state: MetadataState) -> Router {
    Router::new()
        .route("/", get(ping))
        .route("/computeMetadata/v1/project/project-id", get(project_id))
        .route("/computeMetadata/v1/project/numeric-project-id", get(numeric_project_id))
        .route(
            "/computeMetadata/v1/instance/service-accounts",
            get(redirect_service_accounts),
        )
        .route("/computeMetadata/v1/instance/service-accounts/", get(service_accounts))
        .route(
            "/computeMetadata/v1/instance/service-accounts/{service_account}/",
            get(service_account),
        )
        .route(
            "/computeMetadata/v1/instance/service-accounts/{service_account}/aliases",
            get(aliases),
        )
        .route(
            "/computeMetadata/v1/instance/service-accounts/{service_account}/email",
            get(email),
        )
        .route(
            "/computeMetadata/v1/instance/service-accounts/{service_account}/scopes",
            get(scopes),
        )
        .route(
            "/computeMetadata/v1/instance/service-accounts/{service_account}/token",
            get(token),
        )
        .fallback(not_found)
        .with_state(state)
}

fn text(body: impl Into<String>) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body.into()).into_response()
}

fn json<T: Serialize>(body: &T, what: &str) -> Response {
    match serde_json::to_vec(body) {
        Ok(mut bytes) => {
            bytes.push(b'\n');
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        Err(e) => {
            tracing::error!("[sidecar] unable to encode {}: {:?}", what, e);
            GcpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error encoding {what} as json"),
            )
            .into_response()
        }
    }
}

/// `true` only when `recursive` is given exactly once, as `true`.
fn is_recursive(pairs: &[(String, String)]) -> bool {
    let mut values = pairs.iter().filter(|(key, _)| key == "recursive");
    matches!((values.next(), values.next()), (Some((_, value)), None) if value == "true")
}

fn recursive(query: QueryPairs) -> Result<bool, Response> {
    match query {
        Ok(Query(pairs)) => Ok(is_recursive(&pairs)),
        Err(e) => {
            tracing::debug!("[sidecar] bad query: {}", e);
            Err(text_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Can't parse query arguments",
            ))
        }
    }
}

pub async fn ping() -> Response {
    (
        StatusCode::OK,
        [
            (METADATA_FLAVOR_HEADER, METADATA_FLAVOR),
            (header::CONTENT_TYPE.as_str(), TEXT_CONTENT_TYPE),
        ],
        "ok",
    )
        .into_response()
}

pub async fn not_found() -> Response {
    text_error(StatusCode::NOT_FOUND, "404 page not found")
}

pub async fn project_id(State(state): State<MetadataState>) -> Response {
    match state.current().await {
        Some(snapshot) => text(snapshot.metadata.project.clone()),
        None => text_error(StatusCode::NOT_FOUND, METADATA_NOT_INITIALIZED),
    }
}

pub async fn numeric_project_id(State(state): State<MetadataState>) -> Response {
    match state.current().await {
        Some(_) => text(NUMERIC_PROJECT_ID),
        None => text_error(StatusCode::NOT_FOUND, METADATA_NOT_INITIALIZED),
    }
}

/// Redirects to the directory form of the path, keeping the host the client
/// used.
pub async fn redirect_service_accounts(headers: HeaderMap, uri: Uri) -> Response {
    let path = format!("{}/", uri.path());
    let location = match headers.get(header::HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{host}{path}"),
        None => path,
    };
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

pub async fn service_accounts(State(state): State<MetadataState>, query: QueryPairs) -> Response {
    let recursive = match recursive(query) {
        Ok(recursive) => recursive,
        Err(response) => return response,
    };
    let snapshot = state.current().await;

    if !recursive {
        return match snapshot {
            Some(snapshot) => text(format!(
                "{DEFAULT_SERVICE_ACCOUNT}/\n{}/\n",
                snapshot.metadata.service_account_email
            )),
            None => text_error(StatusCode::NOT_FOUND, METADATA_NOT_INITIALIZED),
        };
    }

    let Some(snapshot) = snapshot else {
        return GcpError::new(StatusCode::NOT_FOUND, METADATA_NOT_INITIALIZED).into_response();
    };
    let details = snapshot.metadata.service_account_details();
    let accounts = BTreeMap::from([
        (DEFAULT_SERVICE_ACCOUNT.to_string(), details.clone()),
        (snapshot.metadata.service_account_email.clone(), details),
    ]);
    json(&accounts, "service accounts response")
}

pub async fn service_account(State(state): State<MetadataState>, query: QueryPairs) -> Response {
    let recursive = match recursive(query) {
        Ok(recursive) => recursive,
        Err(response) => return response,
    };

    if !recursive {
        return text(SERVICE_ACCOUNT_ENTRIES);
    }

    match state.current().await {
        Some(snapshot) => json(&snapshot.metadata.service_account_details(), "service account response"),
        None => GcpError::new(StatusCode::NOT_FOUND, METADATA_NOT_INITIALIZED).into_response(),
    }
}

pub async fn aliases() -> Response {
    text(DEFAULT_SERVICE_ACCOUNT)
}

pub async fn email(State(state): State<MetadataState>) -> Response {
    match state.current().await {
        Some(snapshot) => text(snapshot.metadata.service_account_email.clone()),
        None => text_error(StatusCode::NOT_FOUND, METADATA_NOT_INITIALIZED),
    }
}

pub async fn scopes(State(state): State<MetadataState>) -> Response {
    match state.current().await {
        Some(snapshot) => text(snapshot.metadata.scopes.join("\n")),
        None => text_error(StatusCode::NOT_FOUND, METADATA_NOT_INITIALIZED),
    }
}

/// Serves the access token; `expires_in` is computed now, not at fetch time.
pub async fn token(State(state): State<MetadataState>) -> Response {
    match state.current().await {
        Some(snapshot) => json(&snapshot.credential, "credentials response"),
        None => GcpError::new(StatusCode::NOT_FOUND, "Credentials not initialized").into_response(),
    }
}
