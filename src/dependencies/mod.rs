//! # External Dependencies
//!
//! Lifecycle of everything an AzureApp needs outside the cluster: the
//! Terraform-managed stack, the Azure SQL database principal Terraform does
//! not model, and the certificate readiness gate.

pub mod database;
pub mod terraform;

use crate::azure::{AzureClient, DATABASE_SCOPE};
use crate::config::Settings;
use crate::error::Result;
use terraform::TerraformWorkspace;
use tracing::info;

/// App registration credentials produced by the Terraform outputs.
///
/// Consumed to populate the credential Secret; never persisted to the
/// resource's own spec or status.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub app_id: String,
    pub app_secret: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// Per-app key vault name used for the certificate lookup
pub fn vault_name(identifier: &str) -> String {
    format!("{identifier}-kv")
}

/// Readiness gate: whether the SSL certificate for the app is present.
///
/// Returns a boolean only; the state machine owns the retry and delay policy.
pub async fn certificate_ready(azure: &AzureClient, identifier: &str) -> Result<bool> {
    azure.ssl_certificate_exists(&vault_name(identifier)).await
}

/// Provision the database login and ownership grant for an app.
///
/// Only called when the spec enables the database, after the Terraform apply
/// that creates the database itself has succeeded.
pub async fn configure_database_principal(
    settings: &Settings,
    azure: &AzureClient,
    identifier: &str,
) -> Result<()> {
    let token = azure.token(DATABASE_SCOPE).await?;
    let database = database::database_name(identifier);
    let username = database::app_username(identifier);

    let mut client = database::SqlPrincipalClient::connect(settings, &database, token).await?;
    client.create_user(&username).await?;
    client.grant_owner(&username).await?;
    info!(identifier, username, "database principal configured");
    Ok(())
}

/// Destroy the Terraform stack for an app, then delete its remote state blob
/// so no orphaned state artifact remains.
pub async fn destroy_stack(
    workspace: &TerraformWorkspace,
    azure: &AzureClient,
    app_name: &str,
) -> Result<()> {
    workspace.destroy().await?;
    azure.delete_state_blob(&terraform::state_key(app_name)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_name_derives_from_identifier() {
        assert_eq!(vault_name("billing"), "billing-kv");
    }

    #[test]
    fn credential_debug_redacts_secret() {
        let cred = Credential {
            app_id: "client-id".into(),
            app_secret: "hunter2".into(),
        };
        let debug = format!("{cred:?}");
        assert!(debug.contains("client-id"));
        assert!(!debug.contains("hunter2"));
    }
}
