//! # Desired-State Builder
//!
//! Pure mapping from an AzureApp spec plus the app registration credential to
//! the Kubernetes objects that should exist: credential Secret, Deployment,
//! Service and Ingress. No I/O happens in the builders; applying the set is a
//! separate step using server-side apply.
//!
//! Every object is named after `spec.identifier` and carries a controller
//! owner reference, so deleting the AzureApp garbage-collects the whole set.

use crate::constants::{APP_LABEL, FIELD_MANAGER, SECRET_KEY_APP_ID, SECRET_KEY_APP_SECRET};
use crate::crd::AzureApp;
use crate::dependencies::Credential;
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, Secret, SecretKeySelector, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::info;

/// The four objects derived from one AzureApp, in apply order
#[derive(Debug, Clone)]
pub struct DesiredObjectSet {
    pub secret: Secret,
    pub deployment: Deployment,
    pub service: Service,
    pub ingress: Ingress,
}

/// Build the full object set. There are no partial results: any failure is a
/// propagated configuration error.
pub fn desired_set(app: &AzureApp, credential: &Credential) -> Result<DesiredObjectSet> {
    Ok(DesiredObjectSet {
        secret: desired_secret(app, credential)?,
        deployment: desired_deployment(app)?,
        service: desired_service(app)?,
        ingress: desired_ingress(app)?,
    })
}

/// Controller owner reference back to the AzureApp
fn owner_reference(app: &AzureApp) -> Result<OwnerReference> {
    app.controller_owner_ref(&())
        .ok_or_else(|| Error::OwnerReference(app.name_any()))
}

fn object_meta(app: &AzureApp) -> Result<ObjectMeta> {
    Ok(ObjectMeta {
        name: Some(app.spec.identifier.clone()),
        namespace: app.namespace(),
        labels: Some(app_labels(app)),
        owner_references: Some(vec![owner_reference(app)?]),
        ..ObjectMeta::default()
    })
}

fn app_labels(app: &AzureApp) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), app.spec.identifier.clone())])
}

/// Credential Secret with the two fixed app registration keys
pub fn desired_secret(app: &AzureApp, credential: &Credential) -> Result<Secret> {
    Ok(Secret {
        metadata: object_meta(app)?,
        string_data: Some(BTreeMap::from([
            (SECRET_KEY_APP_ID.to_string(), credential.app_id.clone()),
            (
                SECRET_KEY_APP_SECRET.to_string(),
                credential.app_secret.clone(),
            ),
        ])),
        ..Secret::default()
    })
}

/// Single-replica Deployment running the app container.
///
/// Credentials are injected as secret key references, never inlined as plain
/// values; spec env vars come first in key order.
pub fn desired_deployment(app: &AzureApp) -> Result<Deployment> {
    let secret_name = app.spec.identifier.clone();
    let mut env: Vec<EnvVar> = app
        .spec
        .env_vars
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect();
    for key in [SECRET_KEY_APP_ID, SECRET_KEY_APP_SECRET] {
        env.push(EnvVar {
            name: key.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name.clone(),
                    key: key.to_string(),
                    optional: None,
                }),
                ..EnvVarSource::default()
            }),
        });
    }

    Ok(Deployment {
        metadata: object_meta(app)?,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(app_labels(app)),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels(app)),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: app.spec.identifier.clone(),
                        image: Some(app.spec.container_image.clone()),
                        env: Some(env),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    })
}

/// NodePort Service exposing the serving port and selecting the app label
pub fn desired_service(app: &AzureApp) -> Result<Service> {
    Ok(Service {
        metadata: object_meta(app)?,
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: app.spec.serving_port,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(app.spec.serving_port)),
                ..ServicePort::default()
            }]),
            selector: Some(app_labels(app)),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    })
}

/// Ingress routing the spec URL to the Service
pub fn desired_ingress(app: &AzureApp) -> Result<Ingress> {
    Ok(Ingress {
        metadata: object_meta(app)?,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(app.spec.url.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: app.spec.identifier.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(app.spec.serving_port),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..IngressSpec::default()
        }),
        ..Ingress::default()
    })
}

/// Apply the whole set with server-side apply, forcing ownership of the
/// managed fields.
pub async fn apply_all(client: &Client, set: &DesiredObjectSet) -> Result<()> {
    info!("applying derived kubernetes objects");
    apply(client, &set.secret).await?;
    apply(client, &set.deployment).await?;
    apply(client, &set.service).await?;
    apply(client, &set.ingress).await?;
    Ok(())
}

async fn apply<K>(client: &Client, obj: &K) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Serialize
        + DeserializeOwned
        + Clone
        + Debug,
{
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<K> = Api::namespaced(client.clone(), &namespace);
    api.patch(
        &obj.name_any(),
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(obj),
    )
    .await?;
    Ok(())
}
