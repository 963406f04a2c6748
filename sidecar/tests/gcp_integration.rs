// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! GCP provider tests against a simulated vault: the metadata emulation for
//! access tokens and the lease policy for service account keys.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum_test::TestServer;
use common::{MockVault, count, options, token_file};
use credentials_sidecar::configuration::GcpSecretType;
use credentials_sidecar::metrics::init_metrics;
use credentials_sidecar::providers::Provider;
use credentials_sidecar::sidecar::Sidecar;
use serde_json::{Value, json};

const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

fn token_sidecar(vault: &MockVault, token: &tempfile::NamedTempFile) -> Sidecar {
    let provider = common::gcp_static_account(GcpSecretType::AccessToken, Path::new("/gcp/sa.json"));
    Sidecar::new(options(vault, token.path(), provider), init_metrics().unwrap()).unwrap()
}

fn key_sidecar(vault: &MockVault, token: &tempfile::NamedTempFile, destination: &Path) -> Sidecar {
    let provider = common::gcp_static_account(GcpSecretType::ServiceAccountKey, destination);
    Sidecar::new(options(vault, token.path(), provider), init_metrics().unwrap()).unwrap()
}

fn read_key(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

// =============================================================================
// Access Tokens
// =============================================================================

#[tokio::test]
async fn test_metadata_before_first_fetch() {
    let vault = MockVault::start().await;
    let token = token_file();
    let sidecar = token_sidecar(&vault, &token);
    let server = TestServer::new(sidecar.provider_router()).unwrap();

    server.get("/").await.assert_text("ok");

    let response = server.get("/computeMetadata/v1/project/project-id").await;
    response.assert_status_not_found();
    response.assert_text("Metadata not initialized\n");
}

#[tokio::test]
async fn test_token_end_to_end() {
    let vault = MockVault::start().await;
    let token = token_file();
    let sidecar = token_sidecar(&vault, &token);
    let server = TestServer::new(sidecar.provider_router()).unwrap();

    let outcome = sidecar.renew_cycle().await.unwrap();
    assert_eq!(outcome.renewal.lease, Duration::from_secs(3599));
    assert!(outcome.next_interval < Duration::from_secs(3599));
    assert_eq!(count(&vault.state.token_reads), 1);
    assert_eq!(count(&vault.state.definition_reads), 1);

    server
        .get("/computeMetadata/v1/project/project-id")
        .await
        .assert_text(common::GCP_PROJECT);

    let response = server
        .get("/computeMetadata/v1/instance/service-accounts/default/token")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["access_token"], common::GCP_ACCESS_TOKEN);
    assert_eq!(body["token_type"], "Bearer");
    let expires_in = body["expires_in"].as_i64().unwrap();
    assert!((3590..=3599).contains(&expires_in), "expires_in = {expires_in}");
}

#[tokio::test]
async fn test_recursive_service_accounts() {
    let vault = MockVault::start().await;
    let token = token_file();
    let sidecar = token_sidecar(&vault, &token);
    let server = TestServer::new(sidecar.provider_router()).unwrap();
    sidecar.renew_cycle().await.unwrap();

    let response = server
        .get("/computeMetadata/v1/instance/service-accounts/")
        .add_query_param("recursive", "true")
        .await;
    response.assert_status_ok();

    let email = common::GCP_EMAIL;
    let details = json!({"aliases": ["default"], "email": email, "scopes": [SCOPE]});
    response.assert_json(&json!({"default": details, email: details}));

    server
        .get("/computeMetadata/v1/instance/service-accounts/default/scopes")
        .await
        .assert_text(SCOPE);
}

#[tokio::test]
async fn test_roleset_metadata() {
    let vault = MockVault::start().await;
    let token = token_file();
    let sidecar = Sidecar::new(
        options(&vault, token.path(), common::gcp_roleset()),
        init_metrics().unwrap(),
    )
    .unwrap();
    let server = TestServer::new(sidecar.provider_router()).unwrap();
    sidecar.renew_cycle().await.unwrap();

    server
        .get("/computeMetadata/v1/project/project-id")
        .await
        .assert_text(common::GCP_PROJECT);

    // token_scopes is null on the roleset definition
    server
        .get("/computeMetadata/v1/instance/service-accounts/default/scopes")
        .await
        .assert_text("");
}

// =============================================================================
// Service Account Keys
// =============================================================================

#[tokio::test]
async fn test_key_issued_then_lease_renewed() {
    let vault = MockVault::start().await;
    let token = token_file();
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("sa.json");
    let sidecar = key_sidecar(&vault, &token, &destination);

    // No lease yet: a key is issued.
    let outcome = sidecar.renew_cycle().await.unwrap();
    assert_eq!(outcome.renewal.lease, Duration::from_secs(3600));
    assert_eq!(count(&vault.state.key_reads), 1);
    assert_eq!(count(&vault.state.lease_renewals), 0);
    assert_eq!(read_key(&destination), common::service_account_key(1));
    let mode = std::fs::metadata(&destination).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    // Lease held and not expired: renewed in place.
    sidecar.renew_cycle().await.unwrap();
    assert_eq!(count(&vault.state.key_reads), 1);
    assert_eq!(count(&vault.state.lease_renewals), 1);
    assert_eq!(read_key(&destination), common::service_account_key(1));

    let Provider::GcpKey(provider) = sidecar.provider() else {
        panic!("expected a key provider");
    };
    let lease = provider.lease().await.unwrap();
    assert_eq!(lease.lease_id, "gcp/static-account/reader/key/1");
}

#[tokio::test]
async fn test_failed_lease_renewal_issues_new_key() {
    let vault = MockVault::start().await;
    let token = token_file();
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("sa.json");
    let sidecar = key_sidecar(&vault, &token, &destination);

    sidecar.renew_cycle().await.unwrap();
    vault.state.fail_lease_renewal.store(true, Ordering::SeqCst);
    sidecar.renew_cycle().await.unwrap();

    assert_eq!(count(&vault.state.lease_renewals), 1);
    assert_eq!(count(&vault.state.key_reads), 2);
    assert_eq!(read_key(&destination), common::service_account_key(2));
}

#[tokio::test]
async fn test_expired_lease_issues_new_key() {
    let vault = MockVault::start().await;
    vault.state.key_lease_seconds.store(1, Ordering::SeqCst);
    let token = token_file();
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("sa.json");
    let sidecar = key_sidecar(&vault, &token, &destination);

    sidecar.renew_cycle().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    sidecar.renew_cycle().await.unwrap();

    assert_eq!(count(&vault.state.lease_renewals), 0);
    assert_eq!(count(&vault.state.key_reads), 2);
    assert_eq!(read_key(&destination), common::service_account_key(2));
}

#[tokio::test]
async fn test_key_provider_serves_no_credentials() {
    let vault = MockVault::start().await;
    let token = token_file();
    let dir = tempfile::tempdir().unwrap();
    let sidecar = key_sidecar(&vault, &token, &dir.path().join("sa.json"));
    let server = TestServer::new(sidecar.provider_router()).unwrap();

    server.get("/credentials").await.assert_status_not_found();
    server.get("/").await.assert_status_not_found();
}
