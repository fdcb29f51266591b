//! Cluster access used by the provisioning workflow.
//!
//! [`ClusterProvider`] is the seam between the workflow and the Kubernetes API. The real
//! implementation, [`KubeClusterProvider`], talks to the cluster through `kube`; tests drive
//! the workflow with an in-memory implementation.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use thiserror::Error;
use tracing::debug;

use crate::devworkspace::DevWorkspace;

/// Errors returned by a [`ClusterProvider`].
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The requested object does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// An object with the same name already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Client configuration error.
    #[error("Kubernetes configuration error: {0}")]
    Config(String),
}

/// A `{type, status, message}` condition reported on a Deployment or Pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessCondition {
    pub condition_type: String,
    pub status: String,
    pub message: Option<String>,
}

impl ReadinessCondition {
    #[must_use]
    pub fn new(condition_type: &str, status: &str) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: status.to_string(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Whether this is condition `condition_type` with status `True`.
    #[must_use]
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.condition_type == condition_type && self.status == "True"
    }
}

impl fmt::Display for ReadinessCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.condition_type, self.status)?;
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

/// Namespace-scoped view of the cluster.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Namespace all calls are scoped to.
    fn namespace(&self) -> &str;

    /// Fetch a Pod, failing with [`ProviderError::NotFound`] if it is absent.
    async fn get_pod(&self, name: &str) -> Result<Pod, ProviderError>;

    /// Check whether a workspace with this name exists.
    async fn workspace_exists(&self, name: &str) -> Result<bool, ProviderError>;

    /// Create a workspace, failing with [`ProviderError::AlreadyExists`] on conflict.
    async fn create_workspace(&self, workspace: &DevWorkspace)
        -> Result<DevWorkspace, ProviderError>;

    /// Fetch a workspace.
    async fn get_workspace(&self, name: &str) -> Result<DevWorkspace, ProviderError>;

    /// Conditions of a Deployment. A Deployment that does not exist yet has none.
    async fn deployment_conditions(
        &self,
        name: &str,
    ) -> Result<Vec<ReadinessCondition>, ProviderError>;

    /// Names of the Pods matching a label selector.
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<String>, ProviderError>;

    /// Conditions of a Pod.
    async fn pod_conditions(&self, name: &str) -> Result<Vec<ReadinessCondition>, ProviderError>;
}

/// [`ClusterProvider`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterProvider {
    client: Client,
    namespace: String,
}

impl KubeClusterProvider {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    /// Build a client from kubeconfig, the way `kubectl` does.
    ///
    /// `kubeconfig` overrides the default lookup (`$KUBECONFIG`, then `~/.kube/config`),
    /// `context` overrides the current context and `namespace` overrides the context's
    /// namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig cannot be read or the client cannot be created.
    pub async fn from_kubeconfig(
        kubeconfig: Option<&Path>,
        context: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let options = KubeConfigOptions {
            context: context.map(ToString::to_string),
            ..Default::default()
        };

        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ProviderError::Config(format!(
                        "failed to read kubeconfig from {}: {e}",
                        path.display()
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options).await
            }
            None => Config::from_kubeconfig(&options).await,
        }
        .map_err(|e| ProviderError::Config(e.to_string()))?;

        let namespace = namespace.map_or_else(|| config.default_namespace.clone(), String::from);
        let client = Client::try_from(config)?;

        debug!(namespace = %namespace, "Created Kubernetes client");
        Ok(Self::new(client, &namespace))
    }

    fn workspaces(&self) -> Api<DevWorkspace> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn readiness(condition_type: &str, status: &str, message: Option<&str>) -> ReadinessCondition {
    let condition = ReadinessCondition::new(condition_type, status);
    match message.filter(|m| !m.is_empty()) {
        Some(message) => condition.with_message(message),
        None => condition,
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

#[async_trait]
impl ClusterProvider for KubeClusterProvider {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_pod(&self, name: &str) -> Result<Pod, ProviderError> {
        self.pods()
            .get_opt(name)
            .await?
            .ok_or_else(|| ProviderError::NotFound {
                kind: "Pod",
                name: name.to_string(),
            })
    }

    async fn workspace_exists(&self, name: &str) -> Result<bool, ProviderError> {
        Ok(self.workspaces().get_opt(name).await?.is_some())
    }

    async fn create_workspace(
        &self,
        workspace: &DevWorkspace,
    ) -> Result<DevWorkspace, ProviderError> {
        match self
            .workspaces()
            .create(&PostParams::default(), workspace)
            .await
        {
            Ok(created) => Ok(created),
            Err(e) if is_conflict(&e) => Err(ProviderError::AlreadyExists {
                kind: "DevWorkspace",
                name: workspace.metadata.name.clone().unwrap_or_default(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_workspace(&self, name: &str) -> Result<DevWorkspace, ProviderError> {
        self.workspaces()
            .get_opt(name)
            .await?
            .ok_or_else(|| ProviderError::NotFound {
                kind: "DevWorkspace",
                name: name.to_string(),
            })
    }

    async fn deployment_conditions(
        &self,
        name: &str,
    ) -> Result<Vec<ReadinessCondition>, ProviderError> {
        let Some(deployment) = self.deployments().get_opt(name).await? else {
            return Ok(Vec::new());
        };

        Ok(deployment
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default()
            .into_iter()
            .map(|c| readiness(&c.type_, &c.status, c.message.as_deref()))
            .collect())
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<String>, ProviderError> {
        let pods = self
            .pods()
            .list(&ListParams::default().labels(label_selector))
            .await?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }

    async fn pod_conditions(&self, name: &str) -> Result<Vec<ReadinessCondition>, ProviderError> {
        let pod = self.get_pod(name).await?;

        Ok(pod
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default()
            .into_iter()
            .map(|c| readiness(&c.type_, &c.status, c.message.as_deref()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_is_true() {
        assert!(ReadinessCondition::new("Available", "True").is_true("Available"));
        assert!(!ReadinessCondition::new("Available", "False").is_true("Available"));
        assert!(!ReadinessCondition::new("Progressing", "True").is_true("Available"));
    }

    #[test]
    fn test_readiness_from_api_condition() {
        assert_eq!(
            readiness("Ready", "False", Some("containers with unready status: [cde]")),
            ReadinessCondition::new("Ready", "False")
                .with_message("containers with unready status: [cde]")
        );
        assert_eq!(
            readiness("Available", "True", Some("")),
            ReadinessCondition::new("Available", "True")
        );
        assert_eq!(readiness("Available", "True", None).message, None);
    }

    #[test]
    fn test_condition_display() {
        assert_eq!(
            ReadinessCondition::new("Ready", "False").to_string(),
            "Ready=False"
        );
        assert_eq!(
            ReadinessCondition::new("Available", "False")
                .with_message("Deployment does not have minimum availability.")
                .to_string(),
            "Available=False (Deployment does not have minimum availability.)"
        );
    }
}
