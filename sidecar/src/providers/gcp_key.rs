// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Service account keys written to disk.
//!
//! GCP limits how many keys a service account may have, so a key is issued
//! once and its vault lease is renewed for as long as the workload runs. A new
//! key is only issued when there is no lease yet, when the held lease has
//! expired, or when renewing it fails.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use data_encoding::BASE64;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{GcpAccount, Renewal};
use crate::constants::KEY_FILE_MODE;
use crate::errors::SidecarError;
use crate::models::{ServiceAccountKeyInfo, string_field};
use crate::session::AuthSession;
use crate::vault::VaultClient;

/// The vault lease backing the key currently on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLease {
    pub lease_id: String,
    pub duration: Duration,
    pub expires_at: DateTime<Utc>,
}

impl KeyLease {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn renewal(&self) -> Renewal {
        Renewal {
            lease: self.duration,
            expires_at: self.expires_at,
        }
    }
}

pub struct GcpKeyProvider {
    backend: String,
    account: GcpAccount,
    destination: PathBuf,
    // Held across the whole renew-or-issue decision so a lease renewal never
    // races an issuance for the same lease.
    lease: Mutex<Option<KeyLease>>,
}

impl GcpKeyProvider {
    pub fn new(backend: String, account: GcpAccount, destination: PathBuf) -> Self {
        Self {
            backend,
            account,
            destination,
            lease: Mutex::new(None),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub async fn lease(&self) -> Option<KeyLease> {
        self.lease.lock().await.clone()
    }

    pub fn key_path(&self) -> String {
        format!("{}/key", self.account.path(&self.backend))
    }

    #[tracing::instrument(skip(self, vault, session), fields(account = %self.account.name()))]
    pub async fn renew(&self, vault: &VaultClient, session: &AuthSession) -> Result<Renewal, SidecarError> {
        let mut held = self.lease.lock().await;

        let current = held.as_ref().filter(|lease| !lease.is_expired(Utc::now()));
        let lease = match current {
            Some(lease) => match self.renew_lease(vault, session, lease).await {
                Ok(renewed) => renewed,
                Err(e) => {
                    tracing::warn!(error = %e, "[sidecar] unable to renew key lease, issuing a new key");
                    self.issue_key(vault, session).await?
                }
            },
            None => self.issue_key(vault, session).await?,
        };

        let renewal = lease.renewal();
        *held = Some(lease);
        Ok(renewal)
    }

    async fn renew_lease(
        &self,
        vault: &VaultClient,
        session: &AuthSession,
        lease: &KeyLease,
    ) -> Result<KeyLease, SidecarError> {
        let secret = vault
            .renew_lease(&session.client_token, &lease.lease_id, lease.duration.as_secs())
            .await?;

        let renewal = Renewal::from_lease_seconds("sys/leases/renew", secret.lease_duration, Utc::now())?;

        tracing::info!(
            lease_expiration = %renewal.expires_at.to_rfc3339(),
            "[sidecar] gcp key lease renewed"
        );

        Ok(KeyLease {
            lease_id: lease.lease_id.clone(),
            duration: renewal.lease,
            expires_at: renewal.expires_at,
        })
    }

    async fn issue_key(&self, vault: &VaultClient, session: &AuthSession) -> Result<KeyLease, SidecarError> {
        let path = self.key_path();
        let secret = vault.read(&session.client_token, &path, &[]).await?;
        let data = secret.data(&path)?;

        let encoded = string_field(data, &path, "private_key_data")?;
        let key = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| SidecarError::KeyDecode(e.to_string()))?;
        let info: ServiceAccountKeyInfo =
            serde_json::from_slice(&key).map_err(|e| SidecarError::KeyDecode(e.to_string()))?;

        let renewal = Renewal::from_lease_seconds(&path, secret.lease_duration, Utc::now())?;

        write_key_file(&self.destination, &key).await?;

        tracing::info!(
            lease_expiration = %renewal.expires_at.to_rfc3339(),
            project = %info.project_id,
            service_account_email = %info.client_email,
            destination = %self.destination.display(),
            "[sidecar] new gcp credentials"
        );

        Ok(KeyLease {
            lease_id: secret.lease_id.clone(),
            duration: renewal.lease,
            expires_at: renewal.expires_at,
        })
    }
}

/// Replaces `destination` with `key`, readable by the owner only.
///
/// The key is written next to the destination and renamed over it, so a
/// reader sees either the old key or the new one.
pub async fn write_key_file(destination: &Path, key: &[u8]) -> Result<(), SidecarError> {
    let file_name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "key.json".to_string());
    let staging = destination.with_file_name(format!(".{file_name}.tmp"));

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(KEY_FILE_MODE)
        .open(&staging)
        .await?;
    // mode() only applies when the file is created
    file.set_permissions(std::fs::Permissions::from_mode(KEY_FILE_MODE))
        .await?;
    file.write_all(key).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&staging, destination).await?;
    Ok(())
}
