//! # Constants
//!
//! Shared constants for the AzureApp operator.

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "azureapp-controller";

/// Finalizer guarding Azure teardown. While attached, the API server keeps the
/// AzureApp around until the controller has destroyed the provisioned
/// infrastructure and removed the marker.
pub const FINALIZER: &str = "k8sapp.example.dev/destroy-azure-resources";

/// Label key selecting the objects derived from an AzureApp
pub const APP_LABEL: &str = "azureapp";

/// Requeue delay while waiting for the SSL certificate to appear
pub const CERTIFICATE_REQUEUE_SECS: u64 = 30;

/// Fallback requeue delay when the per-resource backoff state is unavailable
pub const ERROR_REQUEUE_SECS: u64 = 60;

/// Fibonacci backoff bounds for failed reconciliation passes
pub const ERROR_BACKOFF_MIN_MINUTES: u64 = 1;
pub const ERROR_BACKOFF_MAX_MINUTES: u64 = 10;

/// Maximum number of AzureApps reconciled in parallel. A single resource key
/// is never reconciled concurrently with itself; kube-runtime's scheduler
/// serializes per key.
pub const MAX_CONCURRENT_RECONCILES: u16 = 3;

/// Secret key carrying the app registration client id
pub const SECRET_KEY_APP_ID: &str = "AZURE_APP_ID";

/// Secret key carrying the app registration client secret
pub const SECRET_KEY_APP_SECRET: &str = "AZURE_APP_SECRET";

/// Name of the SSL certificate looked up in the per-app key vault
pub const SSL_CERTIFICATE_NAME: &str = "ssl";

/// File name of the Terraform input-variable file inside a workspace
pub const TFVARS_FILE: &str = "spec.auto.tfvars.json";

/// Terraform outputs carrying the app registration credentials
pub const TF_OUTPUT_APP_ID: &str = "app_id";
pub const TF_OUTPUT_APP_SECRET: &str = "app_secret";
