// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::constants::SHUTDOWN_TIMEOUT;
use crate::errors::SidecarError;
use crate::metrics::metrics_middleware;

/// One HTTP listener, bound but not yet serving.
pub struct Application {
    name: &'static str,
    local_addr: SocketAddr,
    listener: TcpListener,
    router: Router,
    shutdown_timeout: Duration,
}

impl Application {
    pub async fn bind(name: &'static str, address: &str, router: Router) -> Result<Self, SidecarError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| SidecarError::Bind {
                address: address.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(listener = name, "[sidecar] listening at {}", local_addr);

        Ok(Self {
            name,
            local_addr,
            listener,
            router,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Serves until `cancel` fires, then stops accepting connections and
    /// waits up to the shutdown timeout for in-flight requests.
    pub async fn run_until_stopped(self, cancel: CancellationToken) -> Result<(), SidecarError> {
        let server = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => return result.map_err(SidecarError::from),
            _ = cancel.cancelled() => {}
        }

        tracing::info!(listener = self.name, "[sidecar] draining connections");

        match tokio::time::timeout(self.shutdown_timeout, server).await {
            Ok(result) => result.map_err(SidecarError::from),
            Err(_) => Err(SidecarError::ShutdownTimeout {
                listener: self.name,
                timeout: self.shutdown_timeout,
            }),
        }
    }
}

/// Wraps the provider endpoints with access logging and request metrics.
pub fn provider_app(router: Router) -> Router {
    router
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(access_log))
}

pub async fn access_log(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        path = %path,
        method = %method,
        code = response.status().as_u16(),
        duration = ?start.elapsed(),
        "[sidecar] served request"
    );

    response
}
