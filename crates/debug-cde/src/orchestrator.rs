//! Provisioning workflow.
//!
//! Drives a submitted `DevWorkspace` until its IDE is reachable:
//!
//! ```text
//! Building -> Submitted -> WaitingForDeploymentAvailable -> WaitingForPodReady -> Ready
//! ```
//!
//! The Deployment and Pod are created by the DevWorkspace operator, not by us, so each stage
//! polls at a fixed interval for a fixed number of checks. Every wait can be cut short through
//! the [`CancellationToken`] handed to the [`Provisioner`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use kube::ResourceExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::devworkspace::DevWorkspace;
use crate::provider::{ClusterProvider, ProviderError, ReadinessCondition};
use crate::ui;

/// Label the operator puts on the workspace Pod.
pub const WORKSPACE_NAME_LABEL: &str = "controller.devfile.io/devworkspace_name";
/// Deployment condition waited for.
pub const DEPLOYMENT_AVAILABLE: &str = "Available";
/// Pod condition waited for.
pub const POD_READY: &str = "Ready";

/// Default delay between two status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default number of status checks per stage.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 30;

/// Stages of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStage {
    /// Building the workspace from the target Pod.
    Building,
    /// Creating the workspace and waiting for the operator to pick it up.
    Submitted,
    /// Waiting for the workspace Deployment to be available.
    WaitingForDeploymentAvailable,
    /// Waiting for the workspace Pod to be ready.
    WaitingForPodReady,
    /// Workspace is up.
    Ready,
}

impl ProvisioningStage {
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Building => "building the workspace",
            Self::Submitted => "submitting the workspace",
            Self::WaitingForDeploymentAvailable => "waiting for the deployment to be available",
            Self::WaitingForPodReady => "waiting for the pod to be ready",
            Self::Ready => "resolving the workspace URL",
        }
    }
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// How often and how many times a stage checks for progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    #[must_use]
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Longest a single stage can wait.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_ATTEMPTS)
    }
}

/// What a provisioning run learned about the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningResult {
    /// Name of the created workspace.
    pub workspace_name: String,
    /// Workspace id, also the name of its Deployment.
    pub deployment_id: Option<String>,
    /// Name of the workspace Pod.
    pub pod_name: Option<String>,
    /// IDE URL.
    pub main_url: Option<String>,
}

/// Errors that end a provisioning run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("A DevWorkspace named {name} already exists. Delete it to create a new one.")]
    AlreadyExists { name: String },

    #[error("Failed to create DevWorkspace {name}: {source}")]
    Submission {
        name: String,
        #[source]
        source: ProviderError,
    },

    #[error(
        "Deployment {name} is not available after {attempts} checks ({})",
        format_conditions(.conditions)
    )]
    DeploymentTimeout {
        name: String,
        attempts: u32,
        conditions: Vec<ReadinessCondition>,
    },

    #[error(
        "Pod {name} is not ready after {attempts} checks ({})",
        format_conditions(.conditions)
    )]
    PodTimeout {
        name: String,
        attempts: u32,
        conditions: Vec<ReadinessCondition>,
    },

    #[error(
        "Expected exactly one workspace Pod matching {selector}, found {}",
        format_matches(.matched)
    )]
    PodResolution {
        selector: String,
        matched: Vec<String>,
    },

    #[error("DevWorkspace {name} does not report {field}")]
    Resolution { name: String, field: &'static str },

    #[error("Cancelled while {stage}")]
    Cancelled { stage: ProvisioningStage },

    #[error("Failed while {stage}: {source}")]
    Provider {
        stage: ProvisioningStage,
        #[source]
        source: ProviderError,
    },
}

fn format_conditions(conditions: &[ReadinessCondition]) -> String {
    if conditions.is_empty() {
        return "no conditions reported".to_string();
    }
    conditions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_matches(matched: &[String]) -> String {
    if matched.is_empty() {
        "none".to_string()
    } else {
        format!("{}: {}", matched.len(), matched.join(", "))
    }
}

enum WaitOutcome {
    Satisfied,
    Exhausted(Vec<ReadinessCondition>),
}

/// Runs the provisioning workflow against a [`ClusterProvider`].
pub struct Provisioner<'a, P: ClusterProvider + ?Sized> {
    provider: &'a P,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl<'a, P: ClusterProvider + ?Sized> Provisioner<'a, P> {
    #[must_use]
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            policy: PollPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Submit `workspace` and wait until its IDE URL is known.
    ///
    /// # Errors
    ///
    /// Returns a [`ProvisionError`] describing the stage that failed. A workspace that was
    /// created before the failure is left in place.
    pub async fn provision(
        &self,
        workspace: &DevWorkspace,
    ) -> Result<ProvisioningResult, ProvisionError> {
        let name = self.submit(workspace).await?;
        let mut result = ProvisioningResult {
            workspace_name: name.clone(),
            ..Default::default()
        };

        let deployment_id = self.resolve_deployment_id(&name).await?;
        result.deployment_id = Some(deployment_id.clone());
        self.wait_for_deployment(&deployment_id).await?;

        let pod_name = self.resolve_pod(&name).await?;
        result.pod_name = Some(pod_name.clone());
        self.wait_for_pod(&pod_name).await?;

        result.main_url = Some(self.resolve_main_url(&name).await?);
        info!(
            workspace = %name,
            url = result.main_url.as_deref().unwrap_or_default(),
            "Workspace is ready"
        );
        Ok(result)
    }

    /// Create the workspace unless one with the same name exists. Returns the created name.
    async fn submit(&self, workspace: &DevWorkspace) -> Result<String, ProvisionError> {
        self.ensure_active(ProvisioningStage::Submitted)?;
        let name = workspace.name_any();
        let namespace = self.provider.namespace();

        let exists = self
            .provider
            .workspace_exists(&name)
            .await
            .map_err(|source| ProvisionError::Submission {
                name: name.clone(),
                source,
            })?;
        if exists {
            return Err(ProvisionError::AlreadyExists { name });
        }

        let created = match self.provider.create_workspace(workspace).await {
            Ok(created) => created,
            Err(ProviderError::AlreadyExists { .. }) => {
                return Err(ProvisionError::AlreadyExists { name });
            }
            Err(source) => return Err(ProvisionError::Submission { name, source }),
        };

        let created_name = created.metadata.name.unwrap_or(name);
        info!(workspace = %created_name, namespace = %namespace, "Created DevWorkspace");
        ui::print_created_workspace(&created_name, namespace);
        Ok(created_name)
    }

    /// Read the workspace id the operator assigns once it has seen the workspace.
    async fn resolve_deployment_id(&self, name: &str) -> Result<String, ProvisionError> {
        let stage = ProvisioningStage::Submitted;

        for attempt in 1..=self.policy.max_attempts {
            self.ensure_active(stage)?;

            let workspace = self
                .provider
                .get_workspace(name)
                .await
                .map_err(|source| ProvisionError::Provider { stage, source })?;

            if let Some(id) = workspace
                .status
                .and_then(|s| s.devworkspace_id)
                .filter(|id| !id.is_empty())
            {
                debug!(workspace = %name, deployment = %id, "Resolved workspace deployment");
                return Ok(id);
            }

            debug!(
                workspace = %name,
                attempt,
                max_attempts = self.policy.max_attempts,
                "Workspace id not reported yet"
            );
            self.pause(stage).await?;
        }

        Err(ProvisionError::Resolution {
            name: name.to_string(),
            field: "status.devworkspaceId",
        })
    }

    async fn wait_for_deployment(&self, deployment: &str) -> Result<(), ProvisionError> {
        let stage = ProvisioningStage::WaitingForDeploymentAvailable;
        ui::print_waiting_for_deployment(deployment);

        let provider = self.provider;
        let outcome = self
            .wait_for_condition(stage, DEPLOYMENT_AVAILABLE, move || {
                provider.deployment_conditions(deployment)
            })
            .await?;

        match outcome {
            WaitOutcome::Satisfied => Ok(()),
            WaitOutcome::Exhausted(conditions) => Err(ProvisionError::DeploymentTimeout {
                name: deployment.to_string(),
                attempts: self.policy.max_attempts,
                conditions,
            }),
        }
    }

    /// Find the single Pod of the workspace.
    async fn resolve_pod(&self, workspace: &str) -> Result<String, ProvisionError> {
        let stage = ProvisioningStage::WaitingForPodReady;
        self.ensure_active(stage)?;

        let selector = format!("{WORKSPACE_NAME_LABEL}={workspace}");
        let mut matched = self
            .provider
            .list_pods(&selector)
            .await
            .map_err(|source| ProvisionError::Provider { stage, source })?;

        if matched.len() == 1 {
            return Ok(matched.remove(0));
        }

        warn!(
            selector = %selector,
            matched = matched.len(),
            "Could not resolve a single workspace pod"
        );
        Err(ProvisionError::PodResolution { selector, matched })
    }

    async fn wait_for_pod(&self, pod: &str) -> Result<(), ProvisionError> {
        let stage = ProvisioningStage::WaitingForPodReady;
        ui::print_waiting_for_pod(pod);

        let provider = self.provider;
        let outcome = self
            .wait_for_condition(stage, POD_READY, move || provider.pod_conditions(pod))
            .await?;

        match outcome {
            WaitOutcome::Satisfied => Ok(()),
            WaitOutcome::Exhausted(conditions) => Err(ProvisionError::PodTimeout {
                name: pod.to_string(),
                attempts: self.policy.max_attempts,
                conditions,
            }),
        }
    }

    /// Read the IDE URL. The operator sets it before the Pod turns ready.
    async fn resolve_main_url(&self, name: &str) -> Result<String, ProvisionError> {
        let stage = ProvisioningStage::Ready;
        self.ensure_active(stage)?;

        let workspace = self
            .provider
            .get_workspace(name)
            .await
            .map_err(|source| ProvisionError::Provider { stage, source })?;

        workspace
            .status
            .and_then(|s| s.main_url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ProvisionError::Resolution {
                name: name.to_string(),
                field: "status.mainUrl",
            })
    }

    /// Check `fetch` until it reports `condition_type=True` or the policy runs out.
    async fn wait_for_condition<F, Fut>(
        &self,
        stage: ProvisioningStage,
        condition_type: &str,
        mut fetch: F,
    ) -> Result<WaitOutcome, ProvisionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<ReadinessCondition>, ProviderError>>,
    {
        debug!(
            stage = %stage,
            interval_ms = self.policy.interval.as_millis(),
            max_wait_secs = self.policy.max_wait().as_secs(),
            "Waiting for condition {condition_type}"
        );
        let mut last = Vec::new();

        for attempt in 1..=self.policy.max_attempts {
            if let Err(e) = self.ensure_active(stage) {
                ui::end_progress_line();
                return Err(e);
            }

            let conditions = match fetch().await {
                Ok(conditions) => conditions,
                Err(source) => {
                    ui::end_progress_line();
                    return Err(ProvisionError::Provider { stage, source });
                }
            };

            if conditions.iter().any(|c| c.is_true(condition_type)) {
                debug!(stage = %stage, attempt, "Condition {condition_type} is True");
                ui::print_done();
                return Ok(WaitOutcome::Satisfied);
            }

            if conditions
                .iter()
                .any(|c| c.condition_type == condition_type && c.status == "False")
            {
                ui::print_progress_dot();
            }

            debug!(
                stage = %stage,
                attempt,
                max_attempts = self.policy.max_attempts,
                conditions = %format_conditions(&conditions),
                "Condition {condition_type} not met yet"
            );
            last = conditions;

            if let Err(e) = self.pause(stage).await {
                ui::end_progress_line();
                return Err(e);
            }
        }

        ui::end_progress_line();
        Ok(WaitOutcome::Exhausted(last))
    }

    fn ensure_active(&self, stage: ProvisioningStage) -> Result<(), ProvisionError> {
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled { stage });
        }
        Ok(())
    }

    async fn pause(&self, stage: ProvisioningStage) -> Result<(), ProvisionError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(ProvisionError::Cancelled { stage }),
            () = tokio::time::sleep(self.policy.interval) => Ok(()),
        }
    }
}
