//! Container snapshot of the Pod being debugged.
//!
//! The target Pod is inspected once, when the command starts, and projected into a list of
//! [`ContainerInfo`]s. Everything downstream (the descriptor builder in particular) works on
//! this projection and never touches the Kubernetes types again.

use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::provider::{ClusterProvider, ProviderError};

/// Errors raised while inspecting the target Pod.
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("Pod {pod} in namespace {namespace} not found")]
    NotFound { pod: String, namespace: String },

    #[error("Error getting pod {pod} in namespace {namespace}: {source}")]
    Provider {
        pod: String,
        namespace: String,
        #[source]
        source: ProviderError,
    },
}

/// A network port exposed by a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEndpoint {
    /// Port name, `port<N>` when the Pod left it unnamed.
    pub name: String,
    /// Container port number.
    pub target_port: i32,
}

impl ContainerEndpoint {
    /// Build an endpoint, deriving a name from the port number when none was given.
    #[must_use]
    pub fn new(name: Option<&str>, target_port: i32) -> Self {
        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("port{target_port}"),
        };
        Self { name, target_port }
    }
}

/// A literal environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEnv {
    pub name: String,
    pub value: String,
}

/// A volume mounted in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerVolume {
    pub name: String,
    pub path: String,
}

/// Everything we carry over from one container of the target Pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<ContainerEnv>,
    pub endpoints: Vec<ContainerEndpoint>,
    pub volumes: Vec<ContainerVolume>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
}

impl ContainerInfo {
    /// Project a Kubernetes container spec.
    #[must_use]
    pub fn from_container(container: &Container) -> Self {
        let env = container
            .env
            .iter()
            .flatten()
            .filter_map(|var| match &var.value {
                Some(value) => Some(ContainerEnv {
                    name: var.name.clone(),
                    value: value.clone(),
                }),
                None => {
                    // valueFrom references cannot be expressed in a devfile container
                    debug!(
                        container = %container.name,
                        env = %var.name,
                        "Skipping environment variable without a literal value"
                    );
                    None
                }
            })
            .collect();

        let volumes = container
            .volume_mounts
            .iter()
            .flatten()
            .map(|mount| ContainerVolume {
                name: mount.name.clone(),
                path: mount.mount_path.clone(),
            })
            .collect();

        let endpoints = container
            .ports
            .iter()
            .flatten()
            .map(|port| ContainerEndpoint::new(port.name.as_deref(), port.container_port))
            .collect();

        let resources = container.resources.as_ref();
        let limits = resources.and_then(|r| r.limits.as_ref());
        let requests = resources.and_then(|r| r.requests.as_ref());

        Self {
            name: container.name.clone(),
            image: container.image.clone().unwrap_or_default(),
            command: container.command.clone().unwrap_or_default(),
            args: container.args.clone().unwrap_or_default(),
            env,
            endpoints,
            volumes,
            memory_request: quantity(requests, "memory"),
            memory_limit: quantity(limits, "memory"),
            cpu_request: quantity(requests, "cpu"),
            cpu_limit: quantity(limits, "cpu"),
        }
    }
}

fn quantity(map: Option<&BTreeMap<String, Quantity>>, key: &str) -> Option<String> {
    map.and_then(|m| m.get(key)).map(|q| q.0.clone())
}

/// Project every container of a Pod, preserving their order.
#[must_use]
pub fn containers_from_pod(pod: &Pod) -> Vec<ContainerInfo> {
    pod.spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .map(ContainerInfo::from_container)
                .collect()
        })
        .unwrap_or_default()
}

/// Fetch the target Pod and project its containers.
///
/// # Errors
///
/// Returns [`InspectError::NotFound`] if the Pod does not exist in the provider's namespace.
pub async fn inspect_pod<P: ClusterProvider + ?Sized>(
    provider: &P,
    pod_name: &str,
) -> Result<Vec<ContainerInfo>, InspectError> {
    let namespace = provider.namespace().to_string();

    let pod = match provider.get_pod(pod_name).await {
        Ok(pod) => pod,
        Err(ProviderError::NotFound { .. }) => {
            return Err(InspectError::NotFound {
                pod: pod_name.to_string(),
                namespace,
            });
        }
        Err(source) => {
            return Err(InspectError::Provider {
                pod: pod_name.to_string(),
                namespace,
                source,
            });
        }
    };

    let containers = containers_from_pod(&pod);
    info!(
        pod = %pod_name,
        namespace = %namespace,
        containers = containers.len(),
        "Inspected target pod"
    );
    Ok(containers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerPort, EnvVar, EnvVarSource, PodSpec, ResourceRequirements, SecretKeySelector,
        VolumeMount,
    };

    fn pod(containers: Vec<Container>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_unnamed_port_gets_default_name() {
        let container = Container {
            name: "app".into(),
            image: Some("quay.io/l0rd/outyet".into()),
            ports: Some(vec![ContainerPort {
                container_port: 8080,
                ..Default::default()
            }]),
            ..Default::default()
        };

        let infos = containers_from_pod(&pod(vec![container]));
        assert_eq!(infos.len(), 1);
        assert_eq!(
            infos[0].endpoints,
            vec![ContainerEndpoint {
                name: "port8080".into(),
                target_port: 8080,
            }]
        );
    }

    #[test]
    fn test_empty_port_name_gets_default_name() {
        assert_eq!(ContainerEndpoint::new(Some(""), 9090).name, "port9090");
        assert_eq!(ContainerEndpoint::new(Some("http"), 9090).name, "http");
    }

    #[test]
    fn test_every_port_is_kept() {
        let container = Container {
            name: "app".into(),
            ports: Some(vec![
                ContainerPort {
                    name: Some("http".into()),
                    container_port: 8080,
                    ..Default::default()
                },
                ContainerPort {
                    container_port: 9000,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let info = ContainerInfo::from_container(&container);
        let names: Vec<_> = info.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["http", "port9000"]);
    }

    #[test]
    fn test_resources_env_and_volumes() {
        let container = Container {
            name: "app".into(),
            image: Some("registry/app:1".into()),
            command: Some(vec!["/bin/app".into()]),
            args: Some(vec!["--serve".into()]),
            env: Some(vec![
                EnvVar {
                    name: "MODE".into(),
                    value: Some("debug".into()),
                    ..Default::default()
                },
                EnvVar {
                    name: "TOKEN".into(),
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector {
                            key: "token".into(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            volume_mounts: Some(vec![VolumeMount {
                name: "data".into(),
                mount_path: "/data".into(),
                ..Default::default()
            }]),
            resources: Some(ResourceRequirements {
                limits: Some(BTreeMap::from([
                    ("memory".to_string(), Quantity("512Mi".into())),
                    ("cpu".to_string(), Quantity("500m".into())),
                ])),
                requests: Some(BTreeMap::from([(
                    "memory".to_string(),
                    Quantity("128Mi".into()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = ContainerInfo::from_container(&container);
        assert_eq!(info.image, "registry/app:1");
        assert_eq!(info.command, vec!["/bin/app"]);
        assert_eq!(info.args, vec!["--serve"]);
        assert_eq!(
            info.env,
            vec![ContainerEnv {
                name: "MODE".into(),
                value: "debug".into(),
            }]
        );
        assert_eq!(
            info.volumes,
            vec![ContainerVolume {
                name: "data".into(),
                path: "/data".into(),
            }]
        );
        assert_eq!(info.memory_limit.as_deref(), Some("512Mi"));
        assert_eq!(info.cpu_limit.as_deref(), Some("500m"));
        assert_eq!(info.memory_request.as_deref(), Some("128Mi"));
        assert_eq!(info.cpu_request, None);
    }

    #[test]
    fn test_container_order_is_preserved() {
        let names = ["app", "proxy", "metrics"];
        let containers = names
            .iter()
            .map(|n| Container {
                name: (*n).to_string(),
                ..Default::default()
            })
            .collect();

        let infos = containers_from_pod(&pod(containers));
        let got: Vec<_> = infos.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(got, names);
    }

    #[test]
    fn test_pod_without_spec() {
        assert!(containers_from_pod(&Pod::default()).is_empty());
    }
}
