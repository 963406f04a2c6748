// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Credential providers.
//!
//! Each variant knows how to fetch one kind of credential from vault and how
//! to serve it. The variants share no state, only the contract exposed by
//! [`Provider`]: [`renew`](Provider::renew) fetches (or extends) the
//! credential and reports its lease, [`router`](Provider::router) returns the
//! endpoints that serve it.

pub mod aws;
pub mod gcp_key;
pub mod gcp_token;
pub mod metadata;

use std::time::Duration;

use axum::Router;
use chrono::{DateTime, Utc};

use crate::configuration::{GcpSecretType, ProviderCommand};
use crate::errors::SidecarError;
use crate::models::lease_expiry;
use crate::session::AuthSession;
use crate::vault::VaultClient;

use self::aws::AwsProvider;
use self::gcp_key::GcpKeyProvider;
use self::gcp_token::GcpTokenProvider;

/// Outcome of a successful renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Renewal {
    /// How long the credential is valid for, counted from now.
    pub lease: Duration,
    pub expires_at: DateTime<Utc>,
}

impl Renewal {
    /// Builds a renewal from a lease reported in seconds, rejecting zero.
    pub fn from_lease_seconds(path: &str, seconds: u64, now: DateTime<Utc>) -> Result<Self, SidecarError> {
        if seconds == 0 {
            return Err(SidecarError::malformed(path, "lease duration is zero"));
        }
        let expires_at = lease_expiry(path, seconds, now)?;
        Ok(Self {
            lease: Duration::from_secs(seconds),
            expires_at,
        })
    }
}

/// A GCP secrets engine object that tokens and keys are requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcpAccount {
    StaticAccount(String),
    Roleset(String),
}

impl GcpAccount {
    pub fn name(&self) -> &str {
        match self {
            GcpAccount::StaticAccount(name) | GcpAccount::Roleset(name) => name,
        }
    }

    /// Path of the account definition, e.g. `gcp/static-account/reader`.
    pub fn path(&self, backend: &str) -> String {
        let kind = match self {
            GcpAccount::StaticAccount(_) => "static-account",
            GcpAccount::Roleset(_) => "roleset",
        };
        format!("{}/{}/{}", backend.trim_matches('/'), kind, self.name())
    }

    /// Field of the definition holding the service account's project.
    pub fn project_field(&self) -> &'static str {
        match self {
            GcpAccount::StaticAccount(_) => "service_account_project",
            GcpAccount::Roleset(_) => "project",
        }
    }
}

pub enum Provider {
    Aws(AwsProvider),
    GcpToken(GcpTokenProvider),
    GcpKey(GcpKeyProvider),
}

impl Provider {
    pub fn kind(&self) -> &'static str {
        match self {
            Provider::Aws(_) => "aws",
            Provider::GcpToken(_) => "gcp-token",
            Provider::GcpKey(_) => "gcp-key",
        }
    }

    pub async fn renew(&self, vault: &VaultClient, session: &AuthSession) -> Result<Renewal, SidecarError> {
        match self {
            Provider::Aws(provider) => provider.renew(vault, session).await,
            Provider::GcpToken(provider) => provider.renew(vault, session).await,
            Provider::GcpKey(provider) => provider.renew(vault, session).await,
        }
    }

    /// Endpoints served on the provider listener.
    pub fn router(&self) -> Router {
        match self {
            Provider::Aws(provider) => provider.router(),
            Provider::GcpToken(provider) => provider.router(),
            // The key file is the interface.
            Provider::GcpKey(_) => Router::new(),
        }
    }
}

impl TryFrom<&ProviderCommand> for Provider {
    type Error = SidecarError;

    fn try_from(command: &ProviderCommand) -> Result<Self, Self::Error> {
        let provider = match command {
            ProviderCommand::AwsSidecar(aws) => Provider::Aws(AwsProvider::new(
                aws.secret_backend.clone(),
                aws.role.clone(),
                aws.role_arn.clone().filter(|arn| !arn.is_empty()),
            )),
            ProviderCommand::GcpSidecar(gcp) => {
                let account = match (&gcp.static_account, &gcp.roleset) {
                    (Some(name), _) => GcpAccount::StaticAccount(name.clone()),
                    (None, Some(name)) => GcpAccount::Roleset(name.clone()),
                    (None, None) => {
                        return Err(SidecarError::ConfigError(
                            "one of --static-account or --roleset is required".to_string(),
                        ));
                    }
                };
                match gcp.secret_type {
                    GcpSecretType::AccessToken => {
                        Provider::GcpToken(GcpTokenProvider::new(gcp.secret_backend.clone(), account))
                    }
                    GcpSecretType::ServiceAccountKey => Provider::GcpKey(GcpKeyProvider::new(
                        gcp.secret_backend.clone(),
                        account,
                        gcp.key_file_destination_path.clone(),
                    )),
                }
            }
        };
        Ok(provider)
    }
}
