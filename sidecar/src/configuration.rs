// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};

use crate::constants::{APP_DESCRIPTION, DEFAULT_TOKEN_PATH, DEFAULT_VAULT_ADDRESS};

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = APP_DESCRIPTION, long_about = None)]
pub struct SidecarOptions {
    #[arg(long, default_value = DEFAULT_VAULT_ADDRESS, env("VAULT_ADDR"))]
    pub vault_address: String,
    #[arg(long, default_value = "kubernetes", env("VKCC_KUBE_AUTH_BACKEND"))]
    pub kube_auth_backend: String,
    #[arg(long, env("VKCC_KUBE_AUTH_ROLE"))]
    pub kube_auth_role: String,
    #[arg(long, default_value = DEFAULT_TOKEN_PATH, env("VKCC_TOKEN_PATH"))]
    pub token_path: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8000", env("VKCC_LISTEN_ADDRESS"))]
    pub listen_address: String,
    #[arg(long, default_value = "127.0.0.1:8099", env("VKCC_OPS_ADDRESS"))]
    pub ops_address: String,

    #[command(subcommand)]
    pub provider: ProviderCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ProviderCommand {
    /// Serve AWS credentials on /credentials
    AwsSidecar(AwsOptions),
    /// Serve GCP access tokens via metadata emulation, or write a service account key to disk
    GcpSidecar(GcpOptions),
}

#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct AwsOptions {
    #[arg(long, default_value = "aws", env("VKCC_AWS_SECRET_BACKEND"))]
    pub secret_backend: String,
    #[arg(long, env("VKCC_AWS_SECRET_ROLE"))]
    pub role: String,
    /// Only needed when the backend role maps to more than one IAM role
    #[arg(long, env("VKCC_AWS_ROLE_ARN"))]
    pub role_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
#[command(group(ArgGroup::new("account").required(true).args(["static_account", "roleset"])))]
pub struct GcpOptions {
    #[arg(long, default_value = "gcp", env("VKCC_GCP_SECRET_BACKEND"))]
    pub secret_backend: String,
    #[arg(long, env("VKCC_GCP_STATIC_ACCOUNT"))]
    pub static_account: Option<String>,
    #[arg(long, env("VKCC_GCP_ROLESET"))]
    pub roleset: Option<String>,
    #[arg(long, value_enum, default_value_t = GcpSecretType::AccessToken, env("VKCC_GCP_SECRET_TYPE"))]
    pub secret_type: GcpSecretType,
    #[arg(long, default_value = "/gcp/sa.json", env("VKCC_GCP_KEY_FILE_DESTINATION_PATH"))]
    pub key_file_destination_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum GcpSecretType {
    AccessToken,
    ServiceAccountKey,
}

impl Default for SidecarOptions {
    fn default() -> Self {
        SidecarOptions {
            vault_address: DEFAULT_VAULT_ADDRESS.to_string(),
            kube_auth_backend: "kubernetes".to_string(),
            kube_auth_role: String::new(),
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            listen_address: "127.0.0.1:8000".to_string(),
            ops_address: "127.0.0.1:8099".to_string(),
            provider: ProviderCommand::AwsSidecar(AwsOptions {
                secret_backend: "aws".to_string(),
                role: String::new(),
                role_arn: None,
            }),
        }
    }
}
