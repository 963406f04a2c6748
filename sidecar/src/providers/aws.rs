// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;

use super::Renewal;
use crate::errors::{AwsError, SidecarError};
use crate::models::{AwsCredential, string_field};
use crate::session::AuthSession;
use crate::slot::Slot;
use crate::vault::VaultClient;

pub type CredentialState = Arc<Slot<AwsCredential>>;

/// Fetches STS credentials from the vault AWS secrets engine and serves them
/// on `/credentials` in the container credential provider format.
pub struct AwsProvider {
    backend: String,
    role: String,
    role_arn: Option<String>,
    credentials: CredentialState,
}

impl AwsProvider {
    pub fn new(backend: String, role: String, role_arn: Option<String>) -> Self {
        Self {
            backend,
            role,
            role_arn,
            credentials: Arc::new(Slot::new()),
        }
    }

    pub fn credentials(&self) -> CredentialState {
        self.credentials.clone()
    }

    pub fn secret_path(&self) -> String {
        format!("{}/sts/{}", self.backend.trim_matches('/'), self.role)
    }

    #[tracing::instrument(skip(self, vault, session), fields(role = %self.role))]
    pub async fn renew(&self, vault: &VaultClient, session: &AuthSession) -> Result<Renewal, SidecarError> {
        let path = self.secret_path();
        let query: Vec<(&str, &str)> = self
            .role_arn
            .as_deref()
            .map(|arn| vec![("role_arn", arn)])
            .unwrap_or_default();

        let secret = vault.read(&session.client_token, &path, &query).await?;
        let data = secret.data(&path)?;

        let access_key_id = string_field(data, &path, "access_key")?;
        let secret_access_key = string_field(data, &path, "secret_key")?;
        let session_token = string_field(data, &path, "security_token")?;

        let mut renewal = Renewal::from_lease_seconds(&path, secret.lease_duration, Utc::now())?;

        // The relative lease duration is rounded; the SDKs want the exact expiry.
        let lookup = vault.lookup_lease(&session.client_token, &secret.lease_id).await?;
        renewal.expires_at = lookup.data.expire_time;

        tracing::info!(
            access_key_id = %access_key_id,
            expiration = %renewal.expires_at.to_rfc3339(),
            "[sidecar] new aws credentials"
        );

        self.credentials
            .publish(AwsCredential {
                access_key_id,
                secret_access_key,
                session_token,
                expiration: renewal.expires_at,
            })
            .await;

        Ok(renewal)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/credentials", get(get_credentials))
            .with_state(self.credentials())
    }
}

/// Serves the current credentials.
///
/// Answers `404` with an AWS-shaped error body until the first renewal
/// succeeds.
#[tracing::instrument(skip(credentials))]
pub async fn get_credentials(State(credentials): State<CredentialState>) -> Response {
    let Some(credential) = credentials.current().await else {
        return AwsError::new(StatusCode::NOT_FOUND, "Credentials not initialized").into_response();
    };

    match serde_json::to_vec(credential.as_ref()) {
        Ok(mut body) => {
            body.push(b'\n');
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => {
            tracing::error!("[sidecar] unable to encode credentials: {:?}", e);
            AwsError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error encoding credentials response as json",
            )
            .into_response()
        }
    }
}
