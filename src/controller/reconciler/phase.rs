//! # Provisioning Phases
//!
//! Closed enumeration of the reconciliation phases. Internally comparisons are
//! exhaustive; the free-text `provisioningState` labels only exist at the
//! status boundary.

use std::fmt;

/// Reconciliation phase narrated through `status.provisioningState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningPhase {
    /// Terraform plan reported a diff; the stack is being applied
    ReconcilingDependencies,
    /// The database login and ownership grant are being provisioned
    ConfiguringDbUser,
    /// The SSL certificate is not present yet; pass deferred, not failed
    WaitingCertificate,
    /// Applying the derived Kubernetes objects
    ProvisioningAzure,
    /// Desired state reached
    Provisioned,
    /// Deletion observed; tearing down the Terraform stack
    RemovingAzureResources,
}

impl ProvisioningPhase {
    /// External label written to the status subresource
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReconcilingDependencies => "Reconciling external dependencies",
            Self::ConfiguringDbUser => "Configuring DB User",
            Self::WaitingCertificate => "Waiting certificate",
            Self::ProvisioningAzure => "Provisioning Azure Resources",
            Self::Provisioned => "Provisioned",
            Self::RemovingAzureResources => "Removing Azure resources",
        }
    }

    /// Parse an external label back into a phase. Unknown labels (including
    /// the empty initial state) yield `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "Reconciling external dependencies" => Some(Self::ReconcilingDependencies),
            "Configuring DB User" => Some(Self::ConfiguringDbUser),
            "Waiting certificate" => Some(Self::WaitingCertificate),
            "Provisioning Azure Resources" => Some(Self::ProvisioningAzure),
            "Provisioned" => Some(Self::Provisioned),
            "Removing Azure resources" => Some(Self::RemovingAzureResources),
            _ => None,
        }
    }
}

impl fmt::Display for ProvisioningPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ProvisioningPhase; 6] = [
        ProvisioningPhase::ReconcilingDependencies,
        ProvisioningPhase::ConfiguringDbUser,
        ProvisioningPhase::WaitingCertificate,
        ProvisioningPhase::ProvisioningAzure,
        ProvisioningPhase::Provisioned,
        ProvisioningPhase::RemovingAzureResources,
    ];

    #[test]
    fn labels_roundtrip() {
        for phase in ALL {
            assert_eq!(ProvisioningPhase::parse(phase.as_str()), Some(phase));
        }
    }

    #[test]
    fn empty_initial_state_is_not_a_phase() {
        assert_eq!(ProvisioningPhase::parse(""), None);
    }

    #[test]
    fn display_uses_external_label() {
        assert_eq!(
            ProvisioningPhase::WaitingCertificate.to_string(),
            "Waiting certificate"
        );
    }
}
