// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use zeroize::ZeroizeOnDrop;

use crate::constants::DEFAULT_SERVICE_ACCOUNT;
use crate::errors::SidecarError;

/// The generic envelope returned by vault for logical reads and writes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultSecret {
    #[serde(default)]
    pub lease_id: String,
    /// Lease duration in seconds.
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub auth: Option<VaultAuth>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

impl VaultSecret {
    /// Returns the `data` block or a malformed-response error naming `path`.
    pub fn data(&self, path: &str) -> Result<&Map<String, Value>, SidecarError> {
        self.data
            .as_ref()
            .ok_or_else(|| SidecarError::malformed(path, "no data attached to the response"))
    }
}

#[derive(Clone, Default, Deserialize, ZeroizeOnDrop)]
pub struct VaultAuth {
    pub client_token: String,
    /// Lease duration in seconds.
    #[serde(default)]
    #[zeroize(skip)]
    pub lease_duration: u64,
    #[serde(default)]
    #[zeroize(skip)]
    pub renewable: bool,
}

impl fmt::Debug for VaultAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultAuth")
            .field("client_token", &"[REDACTED]")
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish()
    }
}

/// Errors attached to a non-2xx vault response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultErrors {
    #[serde(default)]
    pub errors: Vec<String>,
}

/// The part of `sys/leases/lookup` the AWS provider cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaseLookup {
    pub data: LeaseLookupData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseLookupData {
    pub expire_time: DateTime<Utc>,
}

/// Extracts a string field from a secret's `data` block.
pub fn string_field(data: &Map<String, Value>, path: &str, key: &str) -> Result<String, SidecarError> {
    match data.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(SidecarError::malformed(path, format!("{key} is not a string"))),
        None => Err(SidecarError::malformed(path, format!("{key} is missing"))),
    }
}

/// Extracts an integer field from a secret's `data` block.
pub fn integer_field(data: &Map<String, Value>, path: &str, key: &str) -> Result<i64, SidecarError> {
    match data.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| SidecarError::malformed(path, format!("{key} is not an integer"))),
        Some(_) => Err(SidecarError::malformed(path, format!("{key} is not a number"))),
        None => Err(SidecarError::malformed(path, format!("{key} is missing"))),
    }
}

/// Extracts an optional list of strings from a secret's `data` block.
pub fn string_list_field(
    data: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<Vec<String>, SidecarError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| SidecarError::malformed(path, format!("{key} is not a list of strings")))
            })
            .collect(),
        Some(_) => Err(SidecarError::malformed(path, format!("{key} is not a list"))),
    }
}

/// When a lease of `seconds` granted at `now` runs out.
pub fn lease_expiry(path: &str, seconds: u64, now: DateTime<Utc>) -> Result<DateTime<Utc>, SidecarError> {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|lease| now.checked_add_signed(lease))
        .ok_or_else(|| SidecarError::malformed(path, "lease duration out of range"))
}

/// AWS credentials in the shape the SDKs' container credential provider expects.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct AwsCredential {
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,

    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,

    #[serde(rename = "Token")]
    pub session_token: String,

    #[serde(rename = "Expiration")]
    #[zeroize(skip)]
    pub expiration: DateTime<Utc>,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for AwsCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// A GCP OAuth2 access token.
///
/// Serialized as the metadata server's token response. `expires_in` is the
/// number of seconds left until `expires_at`, computed when the value is
/// serialized rather than when the token was fetched.
#[derive(Clone, ZeroizeOnDrop)]
pub struct GcpTokenCredential {
    pub access_token: String,
    #[zeroize(skip)]
    pub token_type: &'static str,
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
}

impl GcpTokenCredential {
    pub fn new(access_token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token,
            token_type: "Bearer",
            expires_at,
        }
    }

    /// Whole seconds until the token expires, never negative.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

impl Serialize for GcpTokenCredential {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("GcpTokenCredential", 3)?;
        state.serialize_field("access_token", &self.access_token)?;
        state.serialize_field("expires_in", &self.expires_in(Utc::now()))?;
        state.serialize_field("token_type", self.token_type)?;
        state.end()
    }
}

impl fmt::Debug for GcpTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpTokenCredential")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Information used to masquerade as the GCE metadata server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GceMetadata {
    pub project: String,
    pub service_account_email: String,
    pub scopes: Vec<String>,
}

impl GceMetadata {
    pub fn service_account_details(&self) -> ServiceAccountDetails {
        ServiceAccountDetails {
            aliases: vec![DEFAULT_SERVICE_ACCOUNT.to_string()],
            email: self.service_account_email.clone(),
            scopes: self.scopes.clone(),
        }
    }
}

/// Returned by `computeMetadata/v1/instance/service-accounts/` lookups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceAccountDetails {
    pub aliases: Vec<String>,
    pub email: String,
    pub scopes: Vec<String>,
}

/// The fields of a decoded service account key that are worth logging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceAccountKeyInfo {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub client_email: String,
}
