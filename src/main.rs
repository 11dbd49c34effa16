//! # AzureApp Operator
//!
//! A Kubernetes controller that drives `AzureApp` resources toward their
//! declared state by coordinating three backends:
//!
//! 1. **Terraform** - plans and applies the Azure stack (app registration,
//!    key vault, optional SQL database) in one workspace per resource
//! 2. **Azure SQL** - provisions the database login and ownership grant
//!    Terraform does not model
//! 3. **Kubernetes** - applies the derived object set (Secret, Deployment,
//!    Service, Ingress) via server-side apply
//!
//! Teardown is finalizer-driven: the Terraform stack is destroyed and the
//! remote state blob deleted before the resource is allowed to go away.

use anyhow::{Context as _, Result};
use azureapp_operator::azure::AzureClient;
use azureapp_operator::config::Settings;
use azureapp_operator::controller::reconciler::Context;
use azureapp_operator::runtime;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Configure rustls crypto provider FIRST, before any client is built.
    // Required for rustls 0.23+ when no default provider is set via features.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "azureapp_operator=info".into()),
        )
        .init();

    let settings = Settings::from_env().context("invalid operator configuration")?;
    info!("starting AzureApp operator");

    let client = kube::Client::try_default()
        .await
        .context("failed to build kubernetes client")?;

    let azure = AzureClient::new(&settings);
    let ctx = Arc::new(Context::new(client, settings, azure));

    runtime::run(ctx).await
}
