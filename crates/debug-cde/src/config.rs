//! Command configuration types.
//!
//! This module defines the settings of a single `kubectl debug-cde` run and their defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::builder;

/// Image of the debug sidecar container.
pub const DEFAULT_DEBUG_IMAGE: &str = "quay.io/devfile/universal-developer-image:ubi8-latest";

/// Devfile with the IDE definition.
pub const DEFAULT_IDE_REFERENCE: &str = "https://eclipse-che.github.io/che-plugin-registry/main/v3/plugins/che-incubator/che-code/latest/devfile.yaml";

/// Longest name Kubernetes accepts for an object.
const MAX_NAME_LEN: usize = 253;

/// Settings of one debug session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugConfig {
    // Target
    /// Pod to copy.
    pub target_pod: String,
    /// Name of the copy. Defaults to the target Pod name.
    pub copy_to: Option<String>,
    /// Process namespace sharing requested for the copy. The workspace always shares the
    /// process namespace so the sidecar can attach to the workload.
    pub share_processes: bool,

    // Workspace content
    /// Image of the debug sidecar.
    pub image: String,
    /// Repository cloned into the workspace.
    pub git_repository: String,
    /// Devfile of the IDE.
    pub ide_reference: String,

    // Cluster access
    /// Namespace override.
    pub namespace: Option<String>,
    /// Kubeconfig context override.
    pub context: Option<String>,
    /// Kubeconfig file override.
    pub kubeconfig: Option<PathBuf>,

    // Behaviour
    /// Overall deadline for provisioning.
    pub timeout: Option<Duration>,
    /// Print the workspace instead of creating it.
    pub dry_run: bool,
}

impl DebugConfig {
    /// Create config with defaults for a target Pod and repository.
    #[must_use]
    pub fn with_defaults(target_pod: String, git_repository: String) -> Self {
        Self {
            target_pod,
            copy_to: None,
            share_processes: false,
            image: DEFAULT_DEBUG_IMAGE.into(),
            git_repository,
            ide_reference: DEFAULT_IDE_REFERENCE.into(),
            namespace: None,
            context: None,
            kubeconfig: None,
            timeout: None,
            dry_run: false,
        }
    }

    /// Name the workspace is derived from.
    #[must_use]
    pub fn workload_name(&self) -> &str {
        self.copy_to.as_deref().unwrap_or(&self.target_pod)
    }

    /// Name of the workspace that will be created.
    #[must_use]
    pub fn workspace_name(&self) -> String {
        builder::workspace_name(self.workload_name())
    }

    /// Check the settings before touching the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.target_pod.is_empty() {
            bail!("cannot omit the target pod to debug");
        }
        if self.image.is_empty() {
            bail!("--image cannot be empty");
        }
        if self.ide_reference.is_empty() {
            bail!("--ide cannot be empty");
        }
        if self.git_repository.is_empty() {
            bail!("--git-repository is required");
        }
        builder::project_name(&self.git_repository)?;

        if let Some(copy_to) = &self.copy_to {
            if !is_valid_name(copy_to) {
                bail!(
                    "invalid --copy-to name '{copy_to}': use lowercase letters, digits, '-' and '.'"
                );
            }
        }

        let workspace = self.workspace_name();
        if workspace.len() > MAX_NAME_LEN {
            bail!("workspace name '{workspace}' is longer than {MAX_NAME_LEN} characters");
        }

        if self.timeout.is_some_and(|t| t.is_zero()) {
            bail!("--timeout must be greater than zero");
        }

        Ok(())
    }
}

/// RFC 1123 subdomain check.
fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };

    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DebugConfig {
        DebugConfig::with_defaults("outyet".into(), "https://github.com/l0rd/outyet".into())
    }

    #[test]
    fn test_config_defaults() {
        let config = config();
        assert_eq!(config.image, DEFAULT_DEBUG_IMAGE);
        assert_eq!(config.ide_reference, DEFAULT_IDE_REFERENCE);
        assert!(!config.share_processes);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_workspace_name() {
        let mut config = config();
        assert_eq!(config.workspace_name(), "outyet-dw");

        config.copy_to = Some("outyet-debug".into());
        assert_eq!(config.workload_name(), "outyet-debug");
        assert_eq!(config.workspace_name(), "outyet-debug-dw");
    }

    #[test]
    fn test_invalid_repository() {
        let mut config = config();
        config.git_repository = "outyet".into();
        assert!(config.validate().is_err());

        config.git_repository = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_copy_to() {
        let mut config = config();
        for name in ["Outyet", "-outyet", "outyet-", "out_yet", ""] {
            config.copy_to = Some(name.into());
            assert!(config.validate().is_err(), "{name} should be rejected");
        }

        config.copy_to = Some("outyet.debug-1".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = config();
        config.timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());

        config.timeout = Some(Duration::from_secs(90));
        assert!(config.validate().is_ok());
    }
}
