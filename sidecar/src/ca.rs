// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Vault CA trust sources.
//!
//! The trust roots used to talk to vault are taken from the same environment
//! variables the vault CLI honours, plus `VAULT_CAURL` for a PEM bundle served
//! over HTTP. They are re-read on every renewal cycle so that a rotated CA is
//! picked up without restarting the process.

use std::path::{Path, PathBuf};

use reqwest::Certificate;

use crate::constants::{ENV_VAULT_CACERT, ENV_VAULT_CAPATH, ENV_VAULT_CAURL};
use crate::errors::SidecarError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaSources {
    pub ca_cert: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub ca_url: Option<String>,
}

impl CaSources {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            ca_cert: var(ENV_VAULT_CACERT).map(PathBuf::from),
            ca_path: var(ENV_VAULT_CAPATH).map(PathBuf::from),
            ca_url: var(ENV_VAULT_CAURL),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ca_cert.is_none() && self.ca_path.is_none() && self.ca_url.is_none()
    }

    /// Loads every certificate from the configured sources.
    ///
    /// Returns an empty list when no source is configured, in which case the
    /// built-in roots stay in effect.
    pub async fn load(&self) -> Result<Vec<Certificate>, SidecarError> {
        let mut certificates = Vec::new();

        if let Some(url) = &self.ca_url {
            let pem = fetch_bundle(url).await?;
            certificates.extend(parse_bundle(&pem, url)?);
        }

        if let Some(file) = &self.ca_cert {
            certificates.extend(load_file(file).await?);
        }

        if let Some(dir) = &self.ca_path {
            certificates.extend(load_dir(dir).await?);
        }

        Ok(certificates)
    }
}

async fn fetch_bundle(url: &str) -> Result<Vec<u8>, SidecarError> {
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| SidecarError::CaLoad(format!("unable to fetch {url}: {e}")))?;

    let body = response
        .bytes()
        .await
        .map_err(|e| SidecarError::CaLoad(format!("unable to read {url}: {e}")))?;

    Ok(body.to_vec())
}

fn parse_bundle(pem: &[u8], origin: &str) -> Result<Vec<Certificate>, SidecarError> {
    let certificates = Certificate::from_pem_bundle(pem)
        .map_err(|e| SidecarError::CaLoad(format!("unable to parse {origin}: {e}")))?;

    if certificates.is_empty() {
        return Err(SidecarError::CaLoad(format!("no certificates found in {origin}")));
    }

    Ok(certificates)
}

async fn load_file(path: &Path) -> Result<Vec<Certificate>, SidecarError> {
    let pem = tokio::fs::read(path)
        .await
        .map_err(|e| SidecarError::CaLoad(format!("unable to read {}: {e}", path.display())))?;

    parse_bundle(&pem, &path.display().to_string())
}

async fn load_dir(dir: &Path) -> Result<Vec<Certificate>, SidecarError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| SidecarError::CaLoad(format!("unable to read {}: {e}", dir.display())))?;

    let mut certificates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let pem = tokio::fs::read(&path).await?;
        match Certificate::from_pem_bundle(&pem) {
            Ok(found) => certificates.extend(found),
            Err(e) => tracing::debug!("[sidecar] skipping {}: {}", path.display(), e),
        }
    }

    if certificates.is_empty() {
        return Err(SidecarError::CaLoad(format!(
            "no certificates found in {}",
            dir.display()
        )));
    }

    Ok(certificates)
}
