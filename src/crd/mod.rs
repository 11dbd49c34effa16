//! # Custom Resource Definitions
//!
//! CRD types for the AzureApp operator.
//!
//! An `AzureApp` declares a containerized application together with the Azure
//! dependencies it needs: an app registration (provisioned through Terraform),
//! optionally an Azure SQL database principal, and the Kubernetes objects
//! derived from the spec (Secret, Deployment, Service, Ingress).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// AzureApp Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: k8sapp.example.dev/v0alpha1
/// kind: AzureApp
/// metadata:
///   name: billing
///   namespace: default
/// spec:
///   url: billing.example.dev
///   identifierUri: api://billing
///   identifier: billing
///   servingPort: 8080
///   containerImage: ghcr.io/example/billing:1.4.2
///   appRoles:
///     - reader
///   envVars:
///     LOG_LEVEL: info
///   enableDatabase: true
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "AzureApp",
    group = "k8sapp.example.dev",
    version = "v0alpha1",
    namespaced,
    status = "AzureAppStatus",
    shortname = "azapp",
    printcolumn = r#"{"name":"Deployment", "type":"string", "jsonPath":".status.deployment"}, {"name":"ProvisioningState", "type":"string", "jsonPath":".status.provisioningState"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureAppSpec {
    /// Primary URL for the app, used both as the app registration identifier
    /// URI input and as the Ingress host
    #[serde(default)]
    pub url: String,
    /// Identifier URI set on the Azure app registration
    #[serde(default)]
    pub identifier_uri: String,
    /// Short identifier naming the app registration, the Terraform workspace
    /// key and every derived Kubernetes object. Two AzureApps in the same
    /// namespace must never share an identifier.
    #[serde(default)]
    pub identifier: String,
    /// Port the Service exposes and the Ingress routes to
    #[serde(default)]
    pub serving_port: i32,
    /// Container image for the single app container
    #[serde(default)]
    pub container_image: String,
    /// App roles configured on the Azure app registration
    #[serde(default)]
    pub app_roles: Vec<String>,
    /// Plain environment variables injected into the app container.
    /// Keys are unique; ordering is irrelevant.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    /// Whether an Azure SQL database principal should be provisioned
    #[serde(default)]
    pub enable_database: bool,
}

impl PartialEq for AzureAppSpec {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.identifier_uri == other.identifier_uri
            && self.identifier == other.identifier
            && self.serving_port == other.serving_port
            && self.container_image == other.container_image
            && self.app_roles == other.app_roles
            && self.env_vars == other.env_vars
            && self.enable_database == other.enable_database
    }
}

impl Eq for AzureAppSpec {}

/// Observed state of an AzureApp
///
/// Only the status publisher mutates this. The reconciler never reads it back
/// as a decision input, with two exceptions: suppressing writes whose value
/// equals the current one, and phase-dependent gating.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AzureAppStatus {
    /// Name of the Deployment actually applied for this app
    #[serde(default)]
    pub deployment: String,
    /// Human-readable reconciliation phase label
    #[serde(default)]
    pub provisioning_state: String,
}
