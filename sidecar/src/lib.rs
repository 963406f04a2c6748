// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Credentials Sidecar
//!
//! Brokers short-lived cloud credentials from vault for a Kubernetes workload.
//!
//! The sidecar logs in to vault with the pod's service account token, fetches
//! credentials for a configured role and serves them to the application
//! container over a local HTTP endpoint the cloud SDKs already know how to
//! query. Both the vault session and the credentials are renewed in the
//! background for as long as the pod runs.
//!
//! ## Architecture
//!
//! ```text
//! SDK -> provider listener -> Slot <- credential loop -> vault
//!                                          |
//!                           SessionManager-+-> auth/<backend>/login
//! ```
//!
//! - **AWS**: STS credentials on `/credentials`, in the container credential
//!   provider format.
//! - **GCP token**: OAuth2 access tokens behind an emulation of the GCE
//!   metadata server.
//! - **GCP key**: a service account key file kept on disk, its lease renewed
//!   rather than re-issued.
//!
//! ## Modules
//!
//! - [`application`]: HTTP listeners with graceful, bounded shutdown
//! - [`backoff`]: Failure backoff and renewal jitter
//! - [`ca`]: Vault CA trust sources from the environment
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: Defaults and tunables
//! - [`errors`]: Error types with provider-shaped HTTP responses
//! - [`metrics`]: Prometheus recorder and metric names
//! - [`models`]: Vault responses and served credential types
//! - [`providers`]: AWS and GCP credential providers
//! - [`routes`]: Operational `/__/*` handlers
//! - [`session`]: Vault login and token renewal
//! - [`sidecar`]: Startup sequencing and the credential renewal loop
//! - [`slot`]: Atomically published current values
//! - [`vault`]: Vault HTTP client
//!
//! ## Usage
//!
//! ```bash
//! credentials-sidecar --kube-auth-role my-app aws-sidecar --role my-role
//! ```
//!
//! ## Security Considerations
//!
//! - Credentials and vault tokens are zeroized on drop and redacted from `Debug`
//! - Both listeners bind to the loopback interface by default
//! - Service account key files are written with mode `0600`

pub mod application;
pub mod backoff;
pub mod ca;
pub mod configuration;
pub mod constants;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod routes;
pub mod session;
pub mod sidecar;
pub mod slot;
pub mod vault;
