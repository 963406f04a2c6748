// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Minimal asynchronous client for the vault HTTP API.
//!
//! Only the endpoints the sidecar needs are covered: kubernetes login, token
//! self-renewal, logical reads, and lease lookup/renewal. Every
//! request is recorded in the `vkcc_sidecar_vault_*` metrics.
//!
//! The underlying HTTP client is rebuilt by [`VaultClient::reload_ca`] when
//! the configured CA sources change, so it lives behind a lock and is cloned
//! (cheaply, it is reference counted) for every request.

use std::time::Instant;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::ca::CaSources;
use crate::constants::{VAULT_REQUEST_TIMEOUT, VAULT_TOKEN_HEADER};
use crate::errors::SidecarError;
use crate::metrics;
use crate::models::{LeaseLookup, VaultErrors, VaultSecret};

pub struct VaultClient {
    address: String,
    http: RwLock<Client>,
}

impl VaultClient {
    pub fn new(address: &str) -> Result<Self, SidecarError> {
        let http = build_http_client(Vec::new())?;
        Ok(Self {
            address: address.trim_end_matches('/').to_string(),
            http: RwLock::new(http),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Rebuilds the HTTP client with the CA certificates currently pointed
    /// to by the environment. Does nothing when no CA source is configured.
    #[tracing::instrument(skip(self))]
    pub async fn reload_ca(&self) -> Result<(), SidecarError> {
        let sources = CaSources::from_env();
        if sources.is_empty() {
            return Ok(());
        }

        let certificates = sources.load().await?;
        tracing::debug!("[sidecar] loaded {} vault CA certificates", certificates.len());

        let http = build_http_client(certificates)?;
        *self.http.write().await = http;

        Ok(())
    }

    /// `POST auth/<backend>/login`
    #[tracing::instrument(skip(self, jwt))]
    pub async fn login(&self, backend: &str, role: &str, jwt: &str) -> Result<VaultSecret, SidecarError> {
        let path = format!("auth/{}/login", backend.trim_matches('/'));
        let body = json!({"jwt": jwt, "role": role});
        self.request(Method::POST, &path, None, &[], Some(body)).await
    }

    /// `POST auth/token/renew-self`
    #[tracing::instrument(skip(self, token))]
    pub async fn renew_self(&self, token: &str, increment: u64) -> Result<VaultSecret, SidecarError> {
        let body = json!({"increment": increment});
        self.request(Method::POST, "auth/token/renew-self", Some(token), &[], Some(body))
            .await
    }

    /// `GET <path>` with optional query parameters.
    #[tracing::instrument(skip(self, token))]
    pub async fn read(
        &self,
        token: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<VaultSecret, SidecarError> {
        self.request(Method::GET, path, Some(token), query, None).await
    }

    /// `PUT sys/leases/lookup`
    #[tracing::instrument(skip(self, token, lease_id))]
    pub async fn lookup_lease(&self, token: &str, lease_id: &str) -> Result<LeaseLookup, SidecarError> {
        let body = json!({"lease_id": lease_id});
        self.request(Method::PUT, "sys/leases/lookup", Some(token), &[], Some(body))
            .await
    }

    /// `PUT sys/leases/renew`
    #[tracing::instrument(skip(self, token, lease_id))]
    pub async fn renew_lease(
        &self,
        token: &str,
        lease_id: &str,
        increment: u64,
    ) -> Result<VaultSecret, SidecarError> {
        let body = json!({"lease_id": lease_id, "increment": increment});
        self.request(Method::PUT, "sys/leases/renew", Some(token), &[], Some(body))
            .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<T, SidecarError> {
        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));
        let http = self.http.read().await.clone();

        let mut request = http.request(method.clone(), &url);
        if let Some(token) = token {
            request = request.header(VAULT_TOKEN_HEADER, token);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let in_flight = metrics::VaultInFlight::start();
        let start = Instant::now();
        let result = request.send().await;
        drop(in_flight);

        let response = match result {
            Ok(response) => response,
            Err(source) => {
                metrics::record_vault_request(method.as_str(), "error", start.elapsed());
                return Err(SidecarError::VaultTransport {
                    path: path.to_string(),
                    source,
                });
            }
        };

        let status = response.status();
        metrics::record_vault_request(method.as_str(), status.as_str(), start.elapsed());

        let bytes = response
            .bytes()
            .await
            .map_err(|source| SidecarError::VaultTransport {
                path: path.to_string(),
                source,
            })?;

        if !status.is_success() {
            let errors = serde_json::from_slice::<VaultErrors>(&bytes)
                .map(|e| e.errors)
                .unwrap_or_default();
            return Err(SidecarError::VaultStatus {
                path: path.to_string(),
                status,
                errors,
            });
        }

        if bytes.is_empty() {
            return Err(SidecarError::malformed(path, "empty response body"));
        }

        serde_json::from_slice(&bytes).map_err(|e| SidecarError::malformed(path, e.to_string()))
    }
}

fn build_http_client(certificates: Vec<reqwest::Certificate>) -> Result<Client, SidecarError> {
    let mut builder = Client::builder().timeout(VAULT_REQUEST_TIMEOUT);

    if !certificates.is_empty() {
        builder = builder.tls_built_in_root_certs(false);
        for certificate in certificates {
            builder = builder.add_root_certificate(certificate);
        }
    }

    builder
        .build()
        .map_err(|e| SidecarError::CaLoad(format!("unable to build vault client: {e}")))
}
