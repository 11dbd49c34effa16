//! # Finalizer Lifecycle
//!
//! Guarantees the Terraform stack is destroyed exactly once before the API
//! server is allowed to remove an AzureApp.
//!
//! Ordering is the core safety invariant of the whole operator: destroy runs
//! before the marker is removed, so a failed destroy leaves the finalizer in
//! place and the platform keeps retrying deletion instead of letting the
//! resource vanish with orphaned infrastructure.

use crate::constants::{FIELD_MANAGER, FINALIZER};
use crate::crd::AzureApp;
use crate::dependencies::{self, terraform::TerraformWorkspace};
use crate::error::Result;
use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use tracing::info;

use super::phase::ProvisioningPhase;
use super::{status, Context};

/// Whether the teardown finalizer is attached
pub fn has_finalizer(app: &AzureApp) -> bool {
    contains_finalizer(app.finalizers())
}

/// Pure membership check on a finalizer list
pub fn contains_finalizer(finalizers: &[String]) -> bool {
    finalizers.iter().any(|f| f == FINALIZER)
}

/// Finalizer list with the teardown marker appended (no duplicates)
pub fn with_finalizer(finalizers: &[String]) -> Vec<String> {
    let mut updated = finalizers.to_vec();
    if !contains_finalizer(finalizers) {
        updated.push(FINALIZER.to_string());
    }
    updated
}

/// Finalizer list with the teardown marker removed
pub fn without_finalizer(finalizers: &[String]) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect()
}

/// Attach the teardown finalizer if absent. Checked before writing so an
/// already-attached marker costs no API round-trip and no conflict.
pub async fn ensure(ctx: &Context, app: &AzureApp) -> Result<()> {
    if has_finalizer(app) {
        return Ok(());
    }
    patch_finalizers(ctx, app, with_finalizer(app.finalizers())).await?;
    info!(app = %app.name_any(), "finalizer attached");
    Ok(())
}

/// Teardown path, entered whenever a deletion timestamp is observed.
///
/// With the marker absent this is a no-op: teardown already ran to completion
/// on an earlier pass and the resource is on its way out.
pub async fn teardown(ctx: &Context, app: &AzureApp) -> Result<()> {
    if !has_finalizer(app) {
        return Ok(());
    }
    let name = app.name_any();
    info!(app = %name, "removing Azure resources");
    status::publish(
        &ctx.client,
        app,
        ProvisioningPhase::RemovingAzureResources,
        None,
    )
    .await?;

    // Re-render and init so destroy also works when the workspace was lost,
    // e.g. after the operator was rescheduled onto another node.
    let workspace = TerraformWorkspace::new(&ctx.settings, &name);
    workspace.render(&app.spec).await?;
    workspace.init().await?;
    dependencies::destroy_stack(&workspace, &ctx.azure, &name).await?;

    patch_finalizers(ctx, app, without_finalizer(app.finalizers())).await?;
    info!(app = %name, "done deleting Azure resources");
    Ok(())
}

async fn patch_finalizers(ctx: &Context, app: &AzureApp, finalizers: Vec<String>) -> Result<()> {
    let namespace = app.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<AzureApp> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = serde_json::json!({
        "metadata": { "finalizers": finalizers }
    });
    api.patch(
        &app.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_detects_the_marker() {
        assert!(contains_finalizer(&[FINALIZER.to_string()]));
        assert!(!contains_finalizer(&["other/finalizer".to_string()]));
        assert!(!contains_finalizer(&[]));
    }

    #[test]
    fn with_finalizer_appends_once() {
        let once = with_finalizer(&[]);
        assert_eq!(once, vec![FINALIZER.to_string()]);
        let twice = with_finalizer(&once);
        assert_eq!(twice, once);
    }

    #[test]
    fn without_finalizer_preserves_other_markers() {
        let list = vec!["other/finalizer".to_string(), FINALIZER.to_string()];
        assert_eq!(without_finalizer(&list), vec!["other/finalizer".to_string()]);
    }

    #[test]
    fn removing_from_empty_list_is_a_noop() {
        assert!(without_finalizer(&[]).is_empty());
    }
}
