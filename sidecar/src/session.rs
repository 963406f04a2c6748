// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Vault session management.
//!
//! The sidecar authenticates to vault with the workload's kubernetes service
//! account token and keeps the resulting vault token alive for as long as the
//! process runs.
//!
//! # States
//!
//! ```text
//!                 login ok
//! Unauthenticated ─────────► Authenticated ──┐ renew-self ok
//!        ▲                        │  ▲       │
//!        │  renew failed,         │  └───────┘
//!        │  not renewable,        │
//!        └── or lease expired ────┘  (re_auth_required = true)
//! ```
//!
//! [`SessionManager::run`] drives the transitions in the background.
//! [`SessionManager::ensure_authenticated`] is the precondition every
//! credential renewal goes through: it returns the current session when it is
//! still usable and logs in again otherwise, so a credential is never fetched
//! with an expired or revoked token.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio_util::sync::CancellationToken;
use zeroize::ZeroizeOnDrop;

use crate::backoff::{Backoff, renewal_sleep, sleep_or_cancel};
use crate::errors::SidecarError;
use crate::models::{VaultAuth, lease_expiry};
use crate::vault::VaultClient;

const RENEW_SELF_PATH: &str = "auth/token/renew-self";

/// The sidecar's own authentication to vault.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AuthSession {
    pub client_token: String,
    #[zeroize(skip)]
    pub lease_duration: Duration,
    /// `None` for tokens without a lease, which never expire.
    #[zeroize(skip)]
    pub expires_at: Option<DateTime<Utc>>,
    #[zeroize(skip)]
    pub renewable: bool,
}

impl AuthSession {
    fn new(path: &str, auth: &VaultAuth, now: DateTime<Utc>) -> Result<Self, SidecarError> {
        let expires_at = match auth.lease_duration {
            0 => None,
            seconds => Some(lease_expiry(path, seconds, now)?),
        };
        Ok(Self {
            client_token: auth.client_token.clone(),
            lease_duration: Duration::from_secs(auth.lease_duration),
            expires_at,
            renewable: auth.renewable,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("client_token", &"[REDACTED]")
            .field("lease_duration", &self.lease_duration)
            .field("expires_at", &self.expires_at)
            .field("renewable", &self.renewable)
            .finish()
    }
}

pub struct SessionManager {
    vault: Arc<VaultClient>,
    auth_backend: String,
    auth_role: String,
    token_path: PathBuf,
    session: RwLock<Option<AuthSession>>,
    re_auth_required: AtomicBool,
    login_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        vault: Arc<VaultClient>,
        auth_backend: impl Into<String>,
        auth_role: impl Into<String>,
        token_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            vault,
            auth_backend: auth_backend.into(),
            auth_role: auth_role.into(),
            token_path: token_path.into(),
            session: RwLock::new(None),
            re_auth_required: AtomicBool::new(false),
            login_lock: Mutex::new(()),
        }
    }

    pub async fn current(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub fn re_auth_required(&self) -> bool {
        self.re_auth_required.load(Ordering::SeqCst)
    }

    /// Forces the next [`ensure_authenticated`](Self::ensure_authenticated)
    /// to log in again.
    pub fn invalidate(&self) {
        self.re_auth_required.store(true, Ordering::SeqCst);
    }

    /// Returns a session that is valid right now, logging in if needed.
    pub async fn ensure_authenticated(&self) -> Result<AuthSession, SidecarError> {
        if let Some(session) = self.usable_session().await {
            return Ok(session);
        }

        let _guard = self.login_lock.lock().await;

        // Another task may have logged in while we waited for the lock.
        if let Some(session) = self.usable_session().await {
            return Ok(session);
        }

        self.login().await
    }

    async fn usable_session(&self) -> Option<AuthSession> {
        if self.re_auth_required() {
            return None;
        }
        self.current()
            .await
            .filter(|session| !session.is_expired(Utc::now()))
    }

    /// Exchanges the service account token for a fresh vault token.
    #[tracing::instrument(skip(self))]
    pub async fn login(&self) -> Result<AuthSession, SidecarError> {
        let jwt = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|source| SidecarError::TokenFile {
                path: self.token_path.clone(),
                source,
            })?;

        let secret = self
            .vault
            .login(&self.auth_backend, &self.auth_role, jwt.trim())
            .await?;

        let path = format!("auth/{}/login", self.auth_backend);
        let auth = secret
            .auth
            .as_ref()
            .ok_or_else(|| SidecarError::malformed(&path, "no authentication information attached to the response"))?;

        let session = AuthSession::new(&path, auth, Utc::now())?;

        tracing::info!(
            renewable = session.renewable,
            lease = auth.lease_duration,
            "[sidecar] new login token"
        );

        *self.session.write().await = Some(session.clone());
        self.re_auth_required.store(false, Ordering::SeqCst);

        Ok(session)
    }

    /// Renews the current vault token in place.
    ///
    /// On any failure the session is invalidated so that the next cycle logs
    /// in from scratch.
    #[tracing::instrument(skip(self, session))]
    pub async fn renew(&self, session: &AuthSession) -> Result<AuthSession, SidecarError> {
        let result = self
            .vault
            .renew_self(&session.client_token, session.lease_duration.as_secs())
            .await
            .and_then(|secret| {
                let auth = secret.auth.as_ref().ok_or_else(|| {
                    SidecarError::malformed(RENEW_SELF_PATH, "no authentication information attached to the response")
                })?;
                AuthSession::new(RENEW_SELF_PATH, auth, Utc::now())
            });

        match result {
            Ok(renewed) => {
                tracing::info!(
                    lease_expiration = ?renewed.expires_at,
                    "[sidecar] login token lease renewed"
                );
                *self.session.write().await = Some(renewed.clone());
                Ok(renewed)
            }
            Err(e) => {
                self.invalidate();
                Err(e)
            }
        }
    }

    /// Keeps the vault session alive until `cancel` fires.
    ///
    /// The first login is attempted once: if it fails the error is returned
    /// and `ready` is dropped unsent, since without a session there is nothing
    /// safe to serve. Afterwards every failure is retried with backoff.
    pub async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<(), SidecarError> {
        let mut session = self.login().await?;
        let _ = ready.send(());

        let mut backoff = Backoff::default();
        let mut next = next_renewal(&session);

        loop {
            let Some(delay) = next else {
                tracing::info!("[sidecar] login token does not expire, not renewing");
                cancel.cancelled().await;
                return Ok(());
            };

            if sleep_or_cancel(&cancel, delay).await {
                tracing::debug!("[sidecar] session manager stopping");
                return Ok(());
            }

            match self.cycle(&session).await {
                Ok(renewed) => {
                    backoff.reset();
                    next = next_renewal(&renewed);
                    session = renewed;
                }
                Err(e) => {
                    let d = backoff.next_delay();
                    tracing::error!(error = %e, backoff = ?d, "[sidecar] unable to maintain login token");
                    next = Some(d);
                }
            }
        }
    }

    async fn cycle(&self, session: &AuthSession) -> Result<AuthSession, SidecarError> {
        self.vault.reload_ca().await?;

        if self.re_auth_required() || !session.renewable || session.is_expired(Utc::now()) {
            self.invalidate();
            let _guard = self.login_lock.lock().await;
            return self.login().await;
        }

        // The credential loop may have logged in since our last cycle.
        let current = self.current().await.unwrap_or_else(|| session.clone());
        self.renew(&current).await
    }
}

/// When to look at the session again, or `None` for a token that never expires.
fn next_renewal(session: &AuthSession) -> Option<Duration> {
    if session.lease_duration.is_zero() {
        return None;
    }
    Some(renewal_sleep(session.lease_duration))
}
