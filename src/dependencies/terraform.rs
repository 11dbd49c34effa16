//! # Terraform Workspace
//!
//! Owns one Terraform workspace per AzureApp: renders the root module and the
//! input-variable file, computes a change plan, applies or destroys the stack
//! and exposes the produced credentials.
//!
//! Terraform is invoked as a subprocess with its working directory pinned to
//! the workspace, so concurrent reconciles for different apps never interfere.

use crate::config::Settings;
use crate::constants::{TFVARS_FILE, TF_OUTPUT_APP_ID, TF_OUTPUT_APP_SECRET};
use crate::crd::AzureAppSpec;
use crate::dependencies::Credential;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

/// File name of the root-module template under the Terraform base directory
const ROOT_MODULE_TEMPLATE: &str = "main.tf.tmpl";

/// Remote-state blob key for an app
pub fn state_key(app_name: &str) -> String {
    format!("k8sapp.{app_name}.json")
}

/// Opaque handle to a computed plan, consumed by `apply` within the same
/// reconciliation pass. Never persisted; an interrupted pass recomputes it.
#[derive(Debug)]
pub struct TerraformPlan {
    file: String,
}

/// Backend parameters substituted into the root-module template
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub resource_group: String,
    pub storage_account: String,
    pub container: String,
    pub state_key: String,
}

/// One Terraform workspace keyed by the AzureApp name
#[derive(Debug)]
pub struct TerraformWorkspace {
    exe: PathBuf,
    base_dir: PathBuf,
    workdir: PathBuf,
    app_name: String,
    backend: BackendConfig,
    /// ARM identity exported to the terraform subprocess
    env: Vec<(&'static str, String)>,
}

impl TerraformWorkspace {
    pub fn new(settings: &Settings, app_name: &str) -> Self {
        Self {
            exe: settings.tf_executable_path.clone(),
            base_dir: settings.tf_base_path.clone(),
            workdir: settings.tf_base_path.join(app_name),
            app_name: app_name.to_string(),
            backend: BackendConfig {
                resource_group: settings.tf_backend_resource_group.clone(),
                storage_account: settings.tf_backend_storage_account.clone(),
                container: settings.tf_backend_container.clone(),
                state_key: state_key(app_name),
            },
            env: vec![
                ("ARM_TENANT_ID", settings.arm_tenant_id.clone()),
                ("ARM_SUBSCRIPTION_ID", settings.arm_subscription_id.clone()),
                ("ARM_CLIENT_ID", settings.arm_client_id.clone()),
                ("ARM_CLIENT_SECRET", settings.arm_client_secret.clone()),
            ],
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Read back the spec from the last rendered input-variable file.
    ///
    /// An absent file means the app has never been reconciled from this
    /// workspace; the caller treats that as "must reconcile".
    pub async fn previous_spec(&self) -> Result<Option<AzureAppSpec>> {
        let path = self.workdir.join(TFVARS_FILE);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Render the workspace: ensure the directory exists, materialize the
    /// root module from the template and write the input-variable file.
    /// Every step is an idempotent overwrite.
    pub async fn render(&self, spec: &AzureAppSpec) -> Result<()> {
        tokio::fs::create_dir_all(&self.workdir).await?;

        let template =
            tokio::fs::read_to_string(self.base_dir.join(ROOT_MODULE_TEMPLATE)).await?;
        let main_tf = render_root_module(&template, &self.backend);
        tokio::fs::write(self.workdir.join("main.tf"), main_tf).await?;

        let tfvars = serde_json::to_vec_pretty(spec)?;
        tokio::fs::write(self.workdir.join(TFVARS_FILE), tfvars).await?;
        Ok(())
    }

    pub async fn init(&self) -> Result<()> {
        debug!(workdir = %self.workdir.display(), "terraform init");
        self.run_checked("init", &["init", "-input=false", "-no-color"])
            .await?;
        Ok(())
    }

    /// Compute a change plan. `changed == false` means the live infrastructure
    /// already matches desired state and apply must be skipped.
    pub async fn plan(&self) -> Result<(TerraformPlan, bool)> {
        let plan_file = format!("plan-{}", self.app_name);
        let start = std::time::Instant::now();
        let output = self
            .run(
                "plan",
                &[
                    "plan",
                    "-input=false",
                    "-no-color",
                    "-detailed-exitcode",
                    &format!("-out={plan_file}"),
                ],
            )
            .await?;
        let changed = plan_has_changes(output.status.code(), &output)?;
        info!(
            app = %self.app_name,
            changed,
            elapsed = ?start.elapsed(),
            "terraform plan finished"
        );
        Ok((TerraformPlan { file: plan_file }, changed))
    }

    /// Apply a previously computed plan. Never re-diffs at apply time; the
    /// plan file pins exactly what the plan step saw.
    pub async fn apply(&self, plan: TerraformPlan) -> Result<()> {
        info!(app = %self.app_name, "terraform apply");
        self.run_checked("apply", &["apply", "-input=false", "-no-color", &plan.file])
            .await?;
        Ok(())
    }

    pub async fn destroy(&self) -> Result<()> {
        info!(app = %self.app_name, "terraform destroy");
        self.run_checked(
            "destroy",
            &["destroy", "-auto-approve", "-input=false", "-no-color"],
        )
        .await?;
        Ok(())
    }

    /// Read the app registration credentials from the terraform outputs
    pub async fn credentials(&self) -> Result<Credential> {
        let output = self
            .run_checked("output", &["output", "-json", "-no-color"])
            .await?;
        parse_credentials(&output.stdout)
    }

    async fn run(&self, op: &'static str, args: &[&str]) -> Result<Output> {
        let output = Command::new(&self.exe)
            .args(args)
            .current_dir(&self.workdir)
            .envs(self.env.iter().map(|(k, v)| (*k, v.as_str())))
            .output()
            .await
            .map_err(|e| Error::Terraform {
                op,
                message: format!("failed to spawn {}: {e}", self.exe.display()),
            })?;
        Ok(output)
    }

    async fn run_checked(&self, op: &'static str, args: &[&str]) -> Result<Output> {
        let output = self.run(op, args).await?;
        if !output.status.success() {
            return Err(Error::Terraform {
                op,
                message: stderr_excerpt(&output),
            });
        }
        Ok(output)
    }
}

/// Interpret `terraform plan -detailed-exitcode`: 0 means no changes, 2 means
/// the stack differs from desired state, anything else is a failure.
fn plan_has_changes(code: Option<i32>, output: &Output) -> Result<bool> {
    match code {
        Some(0) => Ok(false),
        Some(2) => Ok(true),
        _ => Err(Error::Terraform {
            op: "plan",
            message: stderr_excerpt(output),
        }),
    }
}

fn stderr_excerpt(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = stderr.trim();
    if message.is_empty() {
        format!("exit status {:?}", output.status.code())
    } else {
        message.to_string()
    }
}

/// Substitute backend parameters into the root-module template.
/// Placeholders: `{{resource_group}}`, `{{storage_account}}`, `{{container}}`,
/// `{{state_key}}`.
fn render_root_module(template: &str, backend: &BackendConfig) -> String {
    template
        .replace("{{resource_group}}", &backend.resource_group)
        .replace("{{storage_account}}", &backend.storage_account)
        .replace("{{container}}", &backend.container)
        .replace("{{state_key}}", &backend.state_key)
}

#[derive(Debug, Deserialize)]
struct OutputValue {
    value: serde_json::Value,
}

fn parse_credentials(stdout: &[u8]) -> Result<Credential> {
    let outputs: HashMap<String, OutputValue> = serde_json::from_slice(stdout)?;
    let get = |name: &'static str| -> Result<String> {
        outputs
            .get(name)
            .and_then(|o| o.value.as_str())
            .map(str::to_string)
            .ok_or(Error::MissingOutput(name))
    };
    Ok(Credential {
        app_id: get(TF_OUTPUT_APP_ID)?,
        app_secret: get(TF_OUTPUT_APP_SECRET)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn settings_for(base: &Path) -> Settings {
        let vars: StdHashMap<String, String> = [
            ("TF_BASE_PATH", base.to_str().unwrap()),
            ("TF_EXECUTABLE_PATH", "/usr/local/bin/terraform"),
            ("TF_BACKEND_RESOURCE_GROUP", "tf-remote"),
            ("TF_BACKEND_STORAGE_ACCOUNT", "operatorstate"),
            ("ARM_TENANT_ID", "tenant"),
            ("ARM_SUBSCRIPTION_ID", "subscription"),
            ("ARM_CLIENT_ID", "client"),
            ("ARM_CLIENT_SECRET", "secret"),
            ("DEFAULT_SQL_SERVER", "sqlserver"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Settings::from_map(&vars).unwrap()
    }

    fn output_with(code: i32, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn state_key_matches_remote_artifact_naming() {
        assert_eq!(state_key("billing"), "k8sapp.billing.json");
    }

    #[test]
    fn plan_exit_zero_means_unchanged() {
        let out = output_with(0, "");
        assert!(!plan_has_changes(Some(0), &out).unwrap());
    }

    #[test]
    fn plan_exit_two_means_changed() {
        let out = output_with(2, "");
        assert!(plan_has_changes(Some(2), &out).unwrap());
    }

    #[test]
    fn plan_exit_one_is_a_failure() {
        let out = output_with(1, "Error: invalid provider configuration");
        let err = plan_has_changes(Some(1), &out).unwrap_err();
        assert!(err.to_string().contains("invalid provider configuration"));
    }

    #[test]
    fn root_module_template_is_substituted() {
        let template = concat!(
            "terraform {\n",
            "  backend \"azurerm\" {\n",
            "    resource_group_name  = \"{{resource_group}}\"\n",
            "    storage_account_name = \"{{storage_account}}\"\n",
            "    container_name       = \"{{container}}\"\n",
            "    key                  = \"{{state_key}}\"\n",
            "  }\n",
            "}\n",
        );
        let backend = BackendConfig {
            resource_group: "tf-remote".into(),
            storage_account: "operatorstate".into(),
            container: "state".into(),
            state_key: state_key("billing"),
        };
        let rendered = render_root_module(template, &backend);
        assert!(rendered.contains("resource_group_name  = \"tf-remote\""));
        assert!(rendered.contains("key                  = \"k8sapp.billing.json\""));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn credentials_are_read_from_outputs() {
        let stdout = br#"{
            "app_id": {"sensitive": false, "type": "string", "value": "client-id"},
            "app_secret": {"sensitive": true, "type": "string", "value": "client-secret"}
        }"#;
        let creds = parse_credentials(stdout).unwrap();
        assert_eq!(creds.app_id, "client-id");
        assert_eq!(creds.app_secret, "client-secret");
    }

    #[test]
    fn missing_output_is_reported_by_name() {
        let stdout = br#"{"app_id": {"value": "client-id"}}"#;
        let err = parse_credentials(stdout).unwrap_err();
        assert!(matches!(err, Error::MissingOutput("app_secret")));
    }

    #[tokio::test]
    async fn previous_spec_is_none_for_fresh_workspace() {
        let base = tempfile::tempdir().unwrap();
        let ws = TerraformWorkspace::new(&settings_for(base.path()), "billing");
        assert!(ws.previous_spec().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn previous_spec_reads_back_rendered_vars() {
        let base = tempfile::tempdir().unwrap();
        tokio::fs::write(base.path().join(ROOT_MODULE_TEMPLATE), "# {{state_key}}\n")
            .await
            .unwrap();

        let spec = AzureAppSpec {
            identifier: "billing".into(),
            serving_port: 8080,
            ..Default::default()
        };
        let ws = TerraformWorkspace::new(&settings_for(base.path()), "billing");
        ws.render(&spec).await.unwrap();

        let previous = ws.previous_spec().await.unwrap().unwrap();
        assert_eq!(previous, spec);

        let main_tf = tokio::fs::read_to_string(ws.workdir().join("main.tf"))
            .await
            .unwrap();
        assert_eq!(main_tf, "# k8sapp.billing.json\n");
    }

    #[tokio::test]
    async fn render_tolerates_existing_workspace() {
        let base = tempfile::tempdir().unwrap();
        tokio::fs::write(base.path().join(ROOT_MODULE_TEMPLATE), "backend\n")
            .await
            .unwrap();

        let spec = AzureAppSpec::default();
        let ws = TerraformWorkspace::new(&settings_for(base.path()), "billing");
        ws.render(&spec).await.unwrap();
        // Re-rendering after a partial failure must not error on the
        // pre-existing directory.
        ws.render(&spec).await.unwrap();
    }
}
