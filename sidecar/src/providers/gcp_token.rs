// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};

use super::metadata::{self, MetadataSnapshot, MetadataState};
use super::{GcpAccount, Renewal};
use crate::errors::SidecarError;
use crate::models::{GceMetadata, GcpTokenCredential, integer_field, string_field, string_list_field};
use crate::session::AuthSession;
use crate::slot::Slot;
use crate::vault::VaultClient;

/// Fetches OAuth2 access tokens for a static account or roleset and serves
/// them through the GCE metadata emulation.
pub struct GcpTokenProvider {
    backend: String,
    account: GcpAccount,
    state: MetadataState,
}

impl GcpTokenProvider {
    pub fn new(backend: String, account: GcpAccount) -> Self {
        Self {
            backend,
            account,
            state: Arc::new(Slot::new()),
        }
    }

    pub fn state(&self) -> MetadataState {
        self.state.clone()
    }

    pub fn token_path(&self) -> String {
        format!("{}/token", self.account.path(&self.backend))
    }

    #[tracing::instrument(skip(self, vault, session), fields(account = %self.account.name()))]
    pub async fn renew(&self, vault: &VaultClient, session: &AuthSession) -> Result<Renewal, SidecarError> {
        let path = self.token_path();
        let secret = vault.read(&session.client_token, &path, &[]).await?;
        let data = secret.data(&path)?;

        let access_token = string_field(data, &path, "token")?;
        let token_ttl = integer_field(data, &path, "token_ttl")?;
        let expires_at_seconds = integer_field(data, &path, "expires_at_seconds")?;

        let lease_seconds = u64::try_from(token_ttl)
            .map_err(|_| SidecarError::malformed(&path, "token_ttl is negative"))?;
        let mut renewal = Renewal::from_lease_seconds(&path, lease_seconds, Utc::now())?;
        renewal.expires_at = DateTime::from_timestamp(expires_at_seconds, 0)
            .ok_or_else(|| SidecarError::malformed(&path, "expires_at_seconds is out of range"))?;

        let metadata = self.read_metadata(vault, session).await?;

        tracing::info!(
            expiration = %renewal.expires_at.to_rfc3339(),
            project = %metadata.project,
            service_account_email = %metadata.service_account_email,
            scopes = ?metadata.scopes,
            "[sidecar] new gcp credentials"
        );

        self.state
            .publish(MetadataSnapshot {
                credential: GcpTokenCredential::new(access_token, renewal.expires_at),
                metadata,
            })
            .await;

        Ok(renewal)
    }

    /// Reads the account definition for the metadata emulation.
    async fn read_metadata(&self, vault: &VaultClient, session: &AuthSession) -> Result<GceMetadata, SidecarError> {
        let path = self.account.path(&self.backend);
        let secret = vault.read(&session.client_token, &path, &[]).await?;
        let data = secret.data(&path)?;

        Ok(GceMetadata {
            project: string_field(data, &path, self.account.project_field())?,
            service_account_email: string_field(data, &path, "service_account_email")?,
            scopes: string_list_field(data, &path, "token_scopes")?,
        })
    }

    pub fn router(&self) -> Router {
        metadata::router(self.state())
    }
}
