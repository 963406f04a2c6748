// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Renewal orchestration.
//!
//! [`Sidecar::run`] sequences the long-lived tasks:
//!
//! 1. the ops listener, which answers from the start;
//! 2. the session manager, until it reports a first login;
//! 3. the credential loop, until it reports a first credential;
//! 4. the provider listener.
//!
//! Any task that fails ends the run with its error. Cancellation (or a
//! failure) stops every task, and each listener drains within its shutdown
//! timeout; a drain that times out is reported like any other failure.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::application::{Application, provider_app};
use crate::backoff::{Backoff, renewal_sleep, sleep_or_cancel};
use crate::configuration::SidecarOptions;
use crate::errors::SidecarError;
use crate::metrics;
use crate::providers::{Provider, Renewal};
use crate::routes;
use crate::session::SessionManager;
use crate::vault::VaultClient;

// ops listener, session, credentials, provider listener
const TASKS: usize = 4;

/// Result of one successful credential renewal cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalOutcome {
    pub renewal: Renewal,
    /// How long to wait before the next cycle.
    pub next_interval: Duration,
}

pub struct Sidecar {
    options: SidecarOptions,
    vault: Arc<VaultClient>,
    session: Arc<SessionManager>,
    provider: Provider,
    metrics: PrometheusHandle,
    ops_addr: OnceLock<SocketAddr>,
    provider_addr: OnceLock<SocketAddr>,
}

impl Sidecar {
    pub fn new(options: SidecarOptions, metrics: PrometheusHandle) -> Result<Self, SidecarError> {
        let vault = Arc::new(VaultClient::new(&options.vault_address)?);
        let session = Arc::new(SessionManager::new(
            vault.clone(),
            options.kube_auth_backend.clone(),
            options.kube_auth_role.clone(),
            options.token_path.clone(),
        ));
        let provider = Provider::try_from(&options.provider)?;

        Ok(Self {
            options,
            vault,
            session,
            provider,
            metrics,
            ops_addr: OnceLock::new(),
            provider_addr: OnceLock::new(),
        })
    }

    /// Address the ops listener is bound to, once [`run`](Self::run) bound it.
    pub fn ops_local_addr(&self) -> Option<SocketAddr> {
        self.ops_addr.get().copied()
    }

    /// Address the provider listener is bound to. Stays `None` until the
    /// first credential has been fetched.
    pub fn provider_local_addr(&self) -> Option<SocketAddr> {
        self.provider_addr.get().copied()
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn session(&self) -> Arc<SessionManager> {
        self.session.clone()
    }

    /// The provider endpoints with access logging and metrics applied.
    pub fn provider_router(&self) -> Router {
        provider_app(self.provider.router())
    }

    /// Runs one credential renewal: reload the vault CA, make sure the session
    /// is usable, then renew through the provider.
    #[tracing::instrument(skip(self), fields(provider = self.provider.kind()))]
    pub async fn renew_cycle(&self) -> Result<RenewalOutcome, SidecarError> {
        self.vault.reload_ca().await?;
        let session = self.session.ensure_authenticated().await?;

        let renewal = match self.provider.renew(&self.vault, &session).await {
            Ok(renewal) => renewal,
            Err(e) => {
                if matches!(
                    &e,
                    SidecarError::VaultStatus { status, .. }
                        if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
                ) {
                    // The token may have been revoked behind our back.
                    self.session.invalidate();
                }
                return Err(e);
            }
        };

        metrics::record_renewal(renewal.expires_at.timestamp());

        Ok(RenewalOutcome {
            renewal,
            next_interval: renewal_sleep(renewal.lease),
        })
    }

    async fn credential_loop(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<(), SidecarError> {
        let mut ready = Some(ready);
        let mut backoff = Backoff::default();

        loop {
            let delay = match self.renew_cycle().await {
                Ok(outcome) => {
                    backoff.reset();
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(());
                    }
                    tracing::info!(
                        next_renewal = ?outcome.next_interval,
                        "[sidecar] credentials renewed"
                    );
                    outcome.next_interval
                }
                Err(e) => {
                    metrics::record_error();
                    let delay = backoff.next_delay();
                    tracing::error!(error = %e, backoff = ?delay, "[sidecar] unable to renew credentials");
                    delay
                }
            };

            if sleep_or_cancel(&cancel, delay).await {
                tracing::debug!("[sidecar] credential loop stopping");
                return Ok(());
            }
        }
    }

    /// Runs the sidecar until `cancel` fires or a task fails.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), SidecarError> {
        let (errors, mut failures) = mpsc::channel(TASKS);
        let mut tasks = JoinSet::new();
        // A failure stops every task without cancelling the caller's token.
        let shutdown = cancel.child_token();

        let ops = Application::bind(
            "ops",
            &self.options.ops_address,
            routes::ops_router(self.metrics.clone()),
        )
        .await?;
        let _ = self.ops_addr.set(ops.local_addr());
        spawn(&mut tasks, &errors, "ops listener", ops.run_until_stopped(shutdown.clone()));

        let outcome: Result<(), SidecarError> = async {
            let (session_ready, first_login) = oneshot::channel();
            spawn(
                &mut tasks,
                &errors,
                "session",
                self.session.clone().run(shutdown.clone(), session_ready),
            );
            if !wait_ready(first_login, &mut failures, &shutdown).await? {
                return Ok(());
            }

            let (credentials_ready, first_credential) = oneshot::channel();
            spawn(
                &mut tasks,
                &errors,
                "credentials",
                self.clone().credential_loop(shutdown.clone(), credentials_ready),
            );
            if !wait_ready(first_credential, &mut failures, &shutdown).await? {
                return Ok(());
            }

            let provider = Application::bind("provider", &self.options.listen_address, self.provider_router()).await?;
            let _ = self.provider_addr.set(provider.local_addr());
            spawn(
                &mut tasks,
                &errors,
                "provider listener",
                provider.run_until_stopped(shutdown.clone()),
            );

            tokio::select! {
                Some(e) = failures.recv() => Err(e),
                _ = shutdown.cancelled() => Ok(()),
            }
        }
        .await;

        shutdown.cancel();
        drop(errors);
        while tasks.join_next().await.is_some() {}

        outcome?;
        // Failures while draining, such as a listener timing out.
        match failures.recv().await {
            Some(e) => Err(e),
            None => {
                tracing::info!("[sidecar] stopped");
                Ok(())
            }
        }
    }
}

fn spawn<F>(
    tasks: &mut JoinSet<()>,
    errors: &mpsc::Sender<SidecarError>,
    name: &'static str,
    task: F,
) where
    F: Future<Output = Result<(), SidecarError>> + Send + 'static,
{
    let errors = errors.clone();
    tasks.spawn(async move {
        if let Err(e) = task.await {
            tracing::error!(task = name, error = %e, "[sidecar] task failed");
            let _ = errors.send(e).await;
        }
    });
}

/// Waits for a readiness signal.
///
/// Returns `Ok(false)` when cancelled first and the failure of any task that
/// ends before the signal arrives.
async fn wait_ready(
    ready: oneshot::Receiver<()>,
    failures: &mut mpsc::Receiver<SidecarError>,
    cancel: &CancellationToken,
) -> Result<bool, SidecarError> {
    tokio::select! {
        signal = ready => {
            if signal.is_ok() {
                return Ok(true);
            }
        }
        Some(e) = failures.recv() => return Err(e),
        _ = cancel.cancelled() => return Ok(false),
    }

    // The signalling task ended without signalling: wait for its error.
    tokio::select! {
        Some(e) = failures.recv() => Err(e),
        _ = cancel.cancelled() => Ok(false),
    }
}
