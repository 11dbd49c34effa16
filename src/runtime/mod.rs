//! # Runtime
//!
//! Watch-loop wiring: builds the controller over all AzureApps, bounds
//! reconciliation parallelism and drains the result stream.
//!
//! kube-runtime's scheduler serializes passes per resource key; the
//! concurrency bound only governs how many distinct AzureApps reconcile in
//! parallel.

use crate::constants::MAX_CONCURRENT_RECONCILES;
use crate::controller::reconciler::{error_policy, reconcile, Context};
use crate::crd::AzureApp;
use futures::StreamExt;
use kube::runtime::controller::Config;
use kube::runtime::{watcher, Controller};
use kube::Api;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run the controller until shutdown is signalled
pub async fn run(ctx: Arc<Context>) -> anyhow::Result<()> {
    let apps: Api<AzureApp> = Api::all(ctx.client.clone());

    info!(
        concurrency = MAX_CONCURRENT_RECONCILES,
        "starting AzureApp controller"
    );
    Controller::new(apps, watcher::Config::default())
        .with_config(Config::default().concurrency(MAX_CONCURRENT_RECONCILES))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _action)) => debug!(app = %object.name, "reconciliation finished"),
                Err(e) => warn!(error = %e, "controller stream error"),
            }
        })
        .await;

    info!("controller stopped");
    Ok(())
}
