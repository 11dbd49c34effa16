//! # Status Publisher
//!
//! Sole writer of the AzureApp status subresource.
//!
//! Two behaviors matter here. Writes whose value equals the current status are
//! suppressed entirely, so pure status-update events never fan out into new
//! watch events. Writes that do go out carry the snapshot's resourceVersion
//! (replace semantics), so a concurrent writer produces a detectable 409
//! instead of a silent overwrite; that conflict is benign and swallowed.

use crate::constants::FIELD_MANAGER;
use crate::crd::{AzureApp, AzureAppStatus};
use crate::error::{is_conflict, Result};
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use super::phase::ProvisioningPhase;

/// Compute the status to write, or `None` when the write would be a no-op.
///
/// `deployment` is only updated when supplied; publishing a phase alone keeps
/// the previously observed deployment name.
pub fn next_status(
    current: Option<&AzureAppStatus>,
    phase: ProvisioningPhase,
    deployment: Option<&str>,
) -> Option<AzureAppStatus> {
    let mut status = current.cloned().unwrap_or_default();
    if let Some(deployment) = deployment {
        status.deployment = deployment.to_string();
    }
    status.provisioning_state = phase.as_str().to_string();

    if Some(&status) == current {
        return None;
    }
    Some(status)
}

/// Publish a phase (and optionally the observed deployment name) to the
/// status subresource. Conflicts mean another writer already advanced the
/// state and are swallowed.
pub async fn publish(
    client: &Client,
    app: &AzureApp,
    phase: ProvisioningPhase,
    deployment: Option<&str>,
) -> Result<()> {
    let name = app.name_any();
    let Some(status) = next_status(app.status.as_ref(), phase, deployment) else {
        debug!(app = %name, %phase, "status unchanged, skipping write");
        return Ok(());
    };

    let namespace = app.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<AzureApp> = Api::namespaced(client.clone(), &namespace);

    let mut updated = app.clone();
    updated.status = Some(status);
    updated.metadata.managed_fields = None;

    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PostParams::default()
    };
    match api
        .replace_status(&name, &params, serde_json::to_vec(&updated)?)
        .await
    {
        Ok(_) => {
            info!(app = %name, %phase, "provisioning state updated");
            Ok(())
        }
        Err(e) if is_conflict(&e) => {
            info!(app = %name, %phase, "ignoring status conflict, concurrent writer won");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current(phase: &str, deployment: &str) -> AzureAppStatus {
        AzureAppStatus {
            deployment: deployment.into(),
            provisioning_state: phase.into(),
        }
    }

    #[test]
    fn first_write_from_empty_status() {
        let status =
            next_status(None, ProvisioningPhase::ReconcilingDependencies, None).unwrap();
        assert_eq!(status.provisioning_state, "Reconciling external dependencies");
        assert_eq!(status.deployment, "");
    }

    #[test]
    fn identical_phase_is_suppressed() {
        let cur = current("Provisioned", "billing");
        assert!(next_status(Some(&cur), ProvisioningPhase::Provisioned, None).is_none());
    }

    #[test]
    fn identical_phase_and_deployment_is_suppressed() {
        let cur = current("Provisioned", "billing");
        assert!(
            next_status(Some(&cur), ProvisioningPhase::Provisioned, Some("billing")).is_none()
        );
    }

    #[test]
    fn phase_change_is_written() {
        let cur = current("Waiting certificate", "");
        let status =
            next_status(Some(&cur), ProvisioningPhase::ProvisioningAzure, None).unwrap();
        assert_eq!(status.provisioning_state, "Provisioning Azure Resources");
    }

    #[test]
    fn deployment_change_alone_is_written() {
        let cur = current("Provisioned", "billing");
        let status =
            next_status(Some(&cur), ProvisioningPhase::Provisioned, Some("billing-v2")).unwrap();
        assert_eq!(status.deployment, "billing-v2");
        assert_eq!(status.provisioning_state, "Provisioned");
    }

    #[test]
    fn publishing_phase_alone_keeps_observed_deployment() {
        let cur = current("Provisioned", "billing");
        let status = next_status(
            Some(&cur),
            ProvisioningPhase::RemovingAzureResources,
            None,
        )
        .unwrap();
        assert_eq!(status.deployment, "billing");
    }
}
