//! # Operator Configuration
//!
//! Process-wide settings loaded once at startup from environment variables and
//! passed by reference into every component constructor. A missing required
//! variable is a fatal startup error; the watch loop never starts.

use std::collections::HashMap;
use std::path::PathBuf;

/// Immutable operator settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding one Terraform workspace per AzureApp
    pub tf_base_path: PathBuf,
    /// Path to the terraform executable
    pub tf_executable_path: PathBuf,
    /// Resource group of the remote-state storage account
    pub tf_backend_resource_group: String,
    /// Storage account holding remote state blobs
    pub tf_backend_storage_account: String,
    /// Blob container holding remote state blobs
    pub tf_backend_container: String,
    /// Azure AD tenant of the controller's service principal
    pub arm_tenant_id: String,
    /// Azure subscription Terraform provisions into
    pub arm_subscription_id: String,
    /// Client id of the controller's service principal
    pub arm_client_id: String,
    /// Client secret of the controller's service principal
    pub arm_client_secret: String,
    /// Logical SQL server hosting per-app databases
    pub default_sql_server: String,
}

/// A required environment variable was not set
#[derive(Debug, thiserror::Error)]
#[error("environment variable {0} is required but not set")]
pub struct MissingVariable(pub &'static str);

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, MissingVariable> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&vars)
    }

    /// Load settings from an explicit variable map
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, MissingVariable> {
        let required = |key: &'static str| -> Result<String, MissingVariable> {
            vars.get(key).cloned().ok_or(MissingVariable(key))
        };

        Ok(Self {
            tf_base_path: PathBuf::from(required("TF_BASE_PATH")?),
            tf_executable_path: PathBuf::from(required("TF_EXECUTABLE_PATH")?),
            tf_backend_resource_group: required("TF_BACKEND_RESOURCE_GROUP")?,
            tf_backend_storage_account: required("TF_BACKEND_STORAGE_ACCOUNT")?,
            tf_backend_container: vars
                .get("TF_BACKEND_CONTAINER")
                .cloned()
                .unwrap_or_else(|| "state".to_string()),
            arm_tenant_id: required("ARM_TENANT_ID")?,
            arm_subscription_id: required("ARM_SUBSCRIPTION_ID")?,
            arm_client_id: required("ARM_CLIENT_ID")?,
            arm_client_secret: required("ARM_CLIENT_SECRET")?,
            default_sql_server: required("DEFAULT_SQL_SERVER")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_map() -> HashMap<String, String> {
        [
            ("TF_BASE_PATH", "/var/lib/azureapp/tf"),
            ("TF_EXECUTABLE_PATH", "/usr/local/bin/terraform"),
            ("TF_BACKEND_RESOURCE_GROUP", "tf-remote"),
            ("TF_BACKEND_STORAGE_ACCOUNT", "operatorstate"),
            ("ARM_TENANT_ID", "tenant"),
            ("ARM_SUBSCRIPTION_ID", "subscription"),
            ("ARM_CLIENT_ID", "client"),
            ("ARM_CLIENT_SECRET", "secret"),
            ("DEFAULT_SQL_SERVER", "prodsqlserver"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn loads_complete_configuration() {
        let settings = Settings::from_map(&full_map()).unwrap();
        assert_eq!(settings.tf_base_path, PathBuf::from("/var/lib/azureapp/tf"));
        assert_eq!(settings.default_sql_server, "prodsqlserver");
    }

    #[test]
    fn backend_container_defaults_to_state() {
        let settings = Settings::from_map(&full_map()).unwrap();
        assert_eq!(settings.tf_backend_container, "state");
    }

    #[test]
    fn backend_container_can_be_overridden() {
        let mut vars = full_map();
        vars.insert("TF_BACKEND_CONTAINER".into(), "tfstate".into());
        let settings = Settings::from_map(&vars).unwrap();
        assert_eq!(settings.tf_backend_container, "tfstate");
    }

    #[test]
    fn missing_required_variable_is_an_error() {
        let mut vars = full_map();
        vars.remove("ARM_TENANT_ID");
        let err = Settings::from_map(&vars).unwrap_err();
        assert_eq!(
            err.to_string(),
            "environment variable ARM_TENANT_ID is required but not set"
        );
    }
}
