//! Debug a running Pod from a Cloud Development Environment.
//!
//! This library copies the containers of a Pod into a DevWorkspace, adds an IDE sidecar and
//! a clone of the application repository, then waits for the DevWorkspace operator to bring
//! it up and reports the IDE URL.
//!
//! # Example
//!
//! ```ignore
//! use debug_cde::builder::build_devworkspace;
//! use debug_cde::orchestrator::Provisioner;
//! use debug_cde::pod_info::inspect_pod;
//! use debug_cde::provider::KubeClusterProvider;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = KubeClusterProvider::from_kubeconfig(None, None, None).await?;
//!     let containers = inspect_pod(&provider, "outyet").await?;
//!     let workspace = build_devworkspace(
//!         "outyet",
//!         &containers,
//!         debug_cde::config::DEFAULT_DEBUG_IMAGE,
//!         "https://github.com/l0rd/outyet",
//!         debug_cde::config::DEFAULT_IDE_REFERENCE,
//!     )?;
//!     let result = Provisioner::new(&provider).provision(&workspace).await?;
//!     println!("{}", result.main_url.unwrap_or_default());
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod builder;
pub mod commands;
pub mod config;
pub mod devworkspace;
pub mod orchestrator;
pub mod pod_info;
pub mod provider;
pub mod ui;

// Re-export commonly used types at the crate root
pub use builder::{build_devworkspace, BuildError};
pub use config::DebugConfig;
pub use devworkspace::{DevWorkspace, DevWorkspaceSpec, DevWorkspaceStatus};
pub use orchestrator::{PollPolicy, ProvisionError, Provisioner, ProvisioningResult, ProvisioningStage};
pub use pod_info::{ContainerInfo, InspectError};
pub use provider::{ClusterProvider, KubeClusterProvider, ProviderError, ReadinessCondition};
