//! CRD manifest generator.
//!
//! Prints the AzureApp CustomResourceDefinition as YAML, suitable for
//! `kubectl apply -f -`.

use kube::CustomResourceExt;

fn main() {
    let crd = azureapp_operator::crd::AzureApp::crd();
    print!(
        "{}",
        serde_yaml::to_string(&crd).expect("failed to serialize AzureApp CRD")
    );
}
