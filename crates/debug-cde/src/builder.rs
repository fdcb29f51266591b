//! Builds the `DevWorkspace` that mirrors the target Pod.
//!
//! The workspace gets:
//! - a `cde` sidecar running the debug image, placed first;
//! - one container component per container of the target Pod, in Pod order;
//! - one git project cloned from the user-supplied repository;
//! - one IDE contribution pulled from a devfile registry.
//!
//! Everything here is pure: the same inputs always produce the same workspace.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use thiserror::Error;

use crate::devworkspace::{
    Component, ComponentContribution, ComponentOverride, ContainerComponent, ContainerOverride,
    DevWorkspace, DevWorkspaceSpec, DevWorkspaceTemplateSpec, Endpoint, EndpointExposure,
    EndpointProtocol, EnvVar, GitProjectSource, Project, VolumeMount,
};
use crate::pod_info::ContainerInfo;

/// Suffix appended to the workload name to name the workspace.
pub const NAME_SUFFIX: &str = "-dw";
/// Remote name used for the cloned project.
pub const DEFAULT_REMOTE_NAME: &str = "origin";

/// Name of the debug sidecar component.
pub const SIDECAR_COMPONENT_NAME: &str = "cde";
const SIDECAR_MEMORY_LIMIT: &str = "8G";
const SIDECAR_MEMORY_REQUEST: &str = "2G";
const SIDECAR_CPU_LIMIT: &str = "4";
const SIDECAR_CPU_REQUEST: &str = "1";

const ENDPOINT_EXPOSURE: EndpointExposure = EndpointExposure::Public;
const ENDPOINT_PROTOCOL: EndpointProtocol = EndpointProtocol::Http;
const ENDPOINT_PATH: &str = "/";
const ENDPOINT_SECURE: bool = false;

const STORAGE_TYPE_ATTRIBUTE: &str = "controller.devfile.io/storage-type";
const POD_OVERRIDES_ATTRIBUTE: &str = "pod-overrides";

/// Name of the IDE contribution.
pub const IDE_CONTRIBUTION_NAME: &str = "che-code";
const IDE_RUNTIME_COMPONENT_NAME: &str = "che-code-runtime-description";
const IDE_HOST_ENV_NAME: &str = "CODE_HOST";
const IDE_HOST_ENV_VALUE: &str = "0.0.0.0";

/// Errors raised while building a workspace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The git remote cannot be turned into a project name.
    #[error("Invalid git remote '{remote}': {reason}")]
    InvalidRemote { remote: String, reason: &'static str },
}

/// Derive the workspace name from the workload name.
#[must_use]
pub fn workspace_name(workload_name: &str) -> String {
    format!("{workload_name}{NAME_SUFFIX}")
}

/// Derive a project name from a git remote.
///
/// One trailing `/` and then one trailing `.git` are dropped before taking the last path
/// segment, so `https://github.com/l0rd/outyet.git` and `git@github.com:l0rd/outyet` both give
/// `outyet`.
///
/// # Errors
///
/// Returns [`BuildError::InvalidRemote`] if the remote has no `/` or ends with an empty
/// segment.
pub fn project_name(remote: &str) -> Result<String, BuildError> {
    let trimmed = remote.strip_suffix('/').unwrap_or(remote);
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let Some(idx) = trimmed.rfind('/') else {
        return Err(BuildError::InvalidRemote {
            remote: remote.to_string(),
            reason: "it doesn't contain a '/'",
        });
    };

    let name = &trimmed[idx + 1..];
    if name.is_empty() {
        return Err(BuildError::InvalidRemote {
            remote: remote.to_string(),
            reason: "it ends with two slashes",
        });
    }

    Ok(name.to_string())
}

/// Build the git project cloned into the workspace.
///
/// # Errors
///
/// Returns [`BuildError::InvalidRemote`] if no project name can be derived from `remote`.
pub fn build_project(remote: &str) -> Result<Project, BuildError> {
    Ok(Project {
        name: project_name(remote)?,
        git: GitProjectSource {
            remotes: BTreeMap::from([(DEFAULT_REMOTE_NAME.to_string(), remote.to_string())]),
        },
    })
}

/// The debug sidecar, sized for running an IDE backend and language servers.
#[must_use]
pub fn sidecar_component(image: &str) -> Component {
    Component {
        name: SIDECAR_COMPONENT_NAME.to_string(),
        container: Some(ContainerComponent {
            image: image.to_string(),
            memory_limit: Some(SIDECAR_MEMORY_LIMIT.to_string()),
            memory_request: Some(SIDECAR_MEMORY_REQUEST.to_string()),
            cpu_limit: Some(SIDECAR_CPU_LIMIT.to_string()),
            cpu_request: Some(SIDECAR_CPU_REQUEST.to_string()),
            ..Default::default()
        }),
    }
}

/// Copy of one container of the target Pod.
#[must_use]
pub fn workload_component(ctr: &ContainerInfo) -> Component {
    let env = ctr
        .env
        .iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            value: e.value.clone(),
        })
        .collect();

    let volume_mounts = ctr
        .volumes
        .iter()
        .map(|v| VolumeMount {
            name: v.name.clone(),
            path: v.path.clone(),
        })
        .collect();

    let endpoints = ctr
        .endpoints
        .iter()
        .map(|e| Endpoint {
            name: e.name.clone(),
            target_port: e.target_port,
            exposure: ENDPOINT_EXPOSURE,
            protocol: ENDPOINT_PROTOCOL,
            secure: ENDPOINT_SECURE,
            path: ENDPOINT_PATH.to_string(),
        })
        .collect();

    Component {
        name: ctr.name.clone(),
        container: Some(ContainerComponent {
            image: ctr.image.clone(),
            memory_limit: ctr.memory_limit.clone(),
            memory_request: ctr.memory_request.clone(),
            cpu_limit: ctr.cpu_limit.clone(),
            cpu_request: ctr.cpu_request.clone(),
            command: ctr.command.clone(),
            args: ctr.args.clone(),
            env,
            volume_mounts,
            endpoints,
        }),
    }
}

/// Workspace attributes: ephemeral storage and a shared process namespace, so the sidecar can
/// see and attach to the workload's processes.
#[must_use]
pub fn default_attributes() -> BTreeMap<String, Value> {
    BTreeMap::from([
        (STORAGE_TYPE_ATTRIBUTE.to_string(), json!("ephemeral")),
        (
            POD_OVERRIDES_ATTRIBUTE.to_string(),
            json!({ "spec": { "shareProcessNamespace": true } }),
        ),
    ])
}

/// IDE contribution imported from `ide_reference`.
///
/// The IDE runtime container is told to listen on every interface so it can be reached through
/// the workspace endpoint.
#[must_use]
pub fn ide_contribution(ide_reference: &str) -> ComponentContribution {
    ComponentContribution {
        name: IDE_CONTRIBUTION_NAME.to_string(),
        uri: ide_reference.to_string(),
        components: vec![ComponentOverride {
            name: IDE_RUNTIME_COMPONENT_NAME.to_string(),
            container: Some(ContainerOverride {
                env: vec![EnvVar {
                    name: IDE_HOST_ENV_NAME.to_string(),
                    value: IDE_HOST_ENV_VALUE.to_string(),
                }],
            }),
        }],
    }
}

/// Assemble the complete workspace for `workload_name`.
///
/// # Errors
///
/// Returns [`BuildError::InvalidRemote`] if `git_url` is not a usable git remote. Nothing is
/// returned in that case, not even a partial workspace.
pub fn build_devworkspace(
    workload_name: &str,
    containers: &[ContainerInfo],
    image: &str,
    git_url: &str,
    ide_reference: &str,
) -> Result<DevWorkspace, BuildError> {
    // Only one repository for now
    let projects = [git_url]
        .iter()
        .map(|remote| build_project(remote))
        .collect::<Result<Vec<_>, _>>()?;

    let mut components = Vec::with_capacity(containers.len() + 1);
    components.push(sidecar_component(image));
    components.extend(containers.iter().map(workload_component));

    let spec = DevWorkspaceSpec {
        started: true,
        template: DevWorkspaceTemplateSpec {
            attributes: default_attributes(),
            components,
            projects,
        },
        contributions: vec![ide_contribution(ide_reference)],
    };

    Ok(DevWorkspace::new(&workspace_name(workload_name), spec))
}
