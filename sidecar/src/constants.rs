// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const APP_NAME: &str = "vault-kube-cloud-credentials";
pub const APP_DESCRIPTION: &str = "Fetch cloud provider credentials from vault on behalf of a Kubernetes service account and serve them via HTTP.";

pub const DEFAULT_VAULT_ADDRESS: &str = "https://127.0.0.1:8200";
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";
pub const VAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// CA trust sources, re-read on every renewal cycle
pub const ENV_VAULT_CACERT: &str = "VAULT_CACERT";
pub const ENV_VAULT_CAPATH: &str = "VAULT_CAPATH";
pub const ENV_VAULT_CAURL: &str = "VAULT_CAURL";

pub const BACKOFF_MIN: Duration = Duration::from_secs(2);
pub const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// https://cloud.google.com/compute/docs/metadata/overview
pub const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
pub const METADATA_FLAVOR: &str = "Google";
pub const NUMERIC_PROJECT_ID: &str = "000000000000";
pub const SERVICE_ACCOUNT_ENTRIES: &str = "aliases\nemail\nidentity\nscopes\ntoken\n";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const KEY_FILE_MODE: u32 = 0o600;
