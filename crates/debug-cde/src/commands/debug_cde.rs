use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::builder::build_devworkspace;
use crate::config::{DebugConfig, DEFAULT_DEBUG_IMAGE, DEFAULT_IDE_REFERENCE};
use crate::orchestrator::{ProvisionError, ProvisioningResult, ProvisioningStage, Provisioner};
use crate::pod_info::inspect_pod;
use crate::provider::{ClusterProvider, KubeClusterProvider};
use crate::ui;

/// Create a copy of a Pod with an IDE sidecar and the application source code
#[derive(Args, Debug)]
pub struct DebugCdeCommand {
    /// Pod to copy
    #[arg(value_name = "POD")]
    pod: String,

    /// Image of the debug sidecar container
    #[arg(long, env = "DEBUG_CDE_IMAGE", default_value = DEFAULT_DEBUG_IMAGE)]
    image: String,

    /// URL of the git repository with the source code of the application to debug
    #[arg(long = "git-repository", value_name = "URL")]
    git_repository: String,

    /// URI of the devfile with the IDE definition
    #[arg(long, env = "DEBUG_CDE_IDE", default_value = DEFAULT_IDE_REFERENCE)]
    ide: String,

    /// Name of the new Pod, copy of the target Pod
    #[arg(long, value_name = "NAME")]
    copy_to: Option<String>,

    /// Enable process namespace sharing in the copy
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    share_processes: Option<bool>,

    /// Namespace of the target Pod
    #[arg(short, long)]
    namespace: Option<String>,

    /// Kubeconfig context to use
    #[arg(long)]
    context: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long, value_name = "FILE")]
    kubeconfig: Option<PathBuf>,

    /// Give up if the workspace is not ready after this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Print the DevWorkspace instead of creating it
    #[arg(long)]
    dry_run: bool,
}

impl DebugCdeCommand {
    fn to_config(&self) -> DebugConfig {
        DebugConfig {
            copy_to: self.copy_to.clone(),
            share_processes: self.share_processes.unwrap_or_default(),
            image: self.image.clone(),
            ide_reference: self.ide.clone(),
            namespace: self.namespace.clone(),
            context: self.context.clone(),
            kubeconfig: self.kubeconfig.clone(),
            timeout: self.timeout.map(Duration::from_secs),
            dry_run: self.dry_run,
            ..DebugConfig::with_defaults(self.pod.clone(), self.git_repository.clone())
        }
    }

    pub async fn run(&self) -> Result<()> {
        let config = self.to_config();
        config.validate()?;

        if self.share_processes == Some(false) {
            ui::print_warning(
                "--share-processes=false is ignored: the IDE sidecar needs to see the workload processes",
            );
        }

        let provider = KubeClusterProvider::from_kubeconfig(
            config.kubeconfig.as_deref(),
            config.context.as_deref(),
            config.namespace.as_deref(),
        )
        .await
        .context("Failed to create Kubernetes client")?;
        let namespace = provider.namespace().to_string();

        let containers = inspect_pod(&provider, &config.target_pod).await?;
        ui::print_target_found(&config.target_pod, &namespace);

        info!(
            stage = %ProvisioningStage::Building,
            workspace = %config.workspace_name(),
            containers = containers.len(),
            "Generating devworkspace"
        );
        let workspace = build_devworkspace(
            config.workload_name(),
            &containers,
            &config.image,
            &config.git_repository,
            &config.ide_reference,
        )
        .context("Error generating devworkspace")?;

        if config.dry_run {
            let yaml = serde_yaml::to_string(&workspace)
                .context("Failed to serialize the devworkspace")?;
            print!("{yaml}");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let provisioner = Provisioner::new(&provider).with_cancellation(cancel.clone());
        let (result, interruption) = provision_until_interrupted(
            provisioner.provision(&workspace),
            &cancel,
            tokio::signal::ctrl_c(),
            config.timeout,
        )
        .await;

        if let Some(interruption) = interruption {
            ui::print_warning(&format!(
                "{interruption}. The devworkspace {} is left in place.",
                config.workspace_name()
            ));
        }
        let result = result?;

        if let Some(url) = result.main_url.as_deref() {
            ui::print_access_url(url);
        }
        Ok(())
    }
}

/// Why a provisioning run was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    Signal,
    Deadline(Duration),
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal => write!(f, "Interrupted"),
            Self::Deadline(timeout) => {
                write!(f, "Workspace not ready after {} seconds", timeout.as_secs())
            }
        }
    }
}

/// Drive `provision` to completion, cancelling `cancel` on `interrupt` or once `timeout`
/// elapses. The provisioning future always finishes on its own so it can report the stage
/// it stopped in.
async fn provision_until_interrupted<F, I>(
    provision: F,
    cancel: &CancellationToken,
    interrupt: I,
    timeout: Option<Duration>,
) -> (Result<ProvisioningResult, ProvisionError>, Option<Interruption>)
where
    F: Future<Output = Result<ProvisioningResult, ProvisionError>>,
    I: Future<Output = std::io::Result<()>>,
{
    let deadline = async move {
        match timeout {
            Some(timeout) => {
                tokio::time::sleep(timeout).await;
                timeout
            }
            None => std::future::pending().await,
        }
    };
    tokio::pin!(provision, interrupt, deadline);

    let mut interruption = None;
    let mut listening = true;
    loop {
        tokio::select! {
            result = &mut provision => return (result, interruption),
            signal = &mut interrupt, if listening && interruption.is_none() => {
                listening = false;
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    continue;
                }
                warn!("Interrupted, stopping");
                interruption = Some(Interruption::Signal);
                cancel.cancel();
            }
            timeout = &mut deadline, if interruption.is_none() => {
                warn!(timeout_secs = timeout.as_secs(), "Provisioning deadline reached");
                interruption = Some(Interruption::Deadline(timeout));
                cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        cmd: DebugCdeCommand,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::try_parse_from([
            "kubectl-debug_cde",
            "outyet",
            "--git-repository",
            "https://github.com/l0rd/outyet",
        ])
        .unwrap();

        let config = cli.cmd.to_config();
        assert_eq!(config.target_pod, "outyet");
        assert_eq!(config.image, DEFAULT_DEBUG_IMAGE);
        assert_eq!(config.ide_reference, DEFAULT_IDE_REFERENCE);
        assert!(!config.share_processes);
        assert_eq!(config.copy_to, None);
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn test_all_flags() {
        let cli = TestCli::try_parse_from([
            "kubectl-debug_cde",
            "outyet",
            "--git-repository",
            "https://github.com/l0rd/outyet",
            "--image",
            "registry/tools:1",
            "--ide",
            "https://registry.example.com/ide.yaml",
            "--copy-to",
            "outyet-debug",
            "--share-processes=false",
            "-n",
            "apps",
            "--timeout",
            "120",
            "--dry-run",
        ])
        .unwrap();

        let config = cli.cmd.to_config();
        assert_eq!(config.image, "registry/tools:1");
        assert_eq!(config.ide_reference, "https://registry.example.com/ide.yaml");
        assert_eq!(config.workspace_name(), "outyet-debug-dw");
        assert!(!config.share_processes);
        assert_eq!(config.namespace.as_deref(), Some("apps"));
        assert_eq!(config.timeout, Some(Duration::from_secs(120)));
        assert!(config.dry_run);
    }

    #[test]
    fn test_requires_exactly_one_pod() {
        let repo = ["--git-repository", "https://github.com/l0rd/outyet"];

        assert!(TestCli::try_parse_from(["kubectl-debug_cde", repo[0], repo[1]]).is_err());
        assert!(
            TestCli::try_parse_from(["kubectl-debug_cde", "a", "b", repo[0], repo[1]]).is_err()
        );
    }

    #[test]
    fn test_requires_git_repository() {
        assert!(TestCli::try_parse_from(["kubectl-debug_cde", "outyet"]).is_err());
    }

    #[test]
    fn test_share_processes_forms() {
        fn parse(args: &[&str]) -> Result<Option<bool>, clap::Error> {
            let argv = std::iter::once("kubectl-debug_cde").chain(args.iter().copied());
            TestCli::try_parse_from(argv).map(|cli| cli.cmd.share_processes)
        }
        let repo = "--git-repository=https://github.com/l0rd/outyet";

        assert_eq!(parse(&["outyet", repo]).unwrap(), None);
        assert_eq!(
            parse(&["outyet", "--share-processes", repo]).unwrap(),
            Some(true)
        );
        assert_eq!(
            parse(&["outyet", repo, "--share-processes"]).unwrap(),
            Some(true)
        );
        assert_eq!(
            parse(&["--share-processes", "outyet", repo]).unwrap(),
            Some(true)
        );
        assert_eq!(
            parse(&["outyet", "--share-processes=true", repo]).unwrap(),
            Some(true)
        );
        assert_eq!(
            parse(&["outyet", "--share-processes=false", repo]).unwrap(),
            Some(false)
        );
        // Like a boolean pflag, the flag never consumes the next argument
        assert!(parse(&["outyet", "--share-processes", "false", repo]).is_err());
    }

    fn cancelled_at_pod_stage(
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<ProvisioningResult, ProvisionError>> {
        let token = cancel.clone();
        async move {
            token.cancelled().await;
            Err(ProvisionError::Cancelled {
                stage: ProvisioningStage::WaitingForPodReady,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_provisioning() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let (result, interruption) = provision_until_interrupted(
            cancelled_at_pod_stage(&cancel),
            &cancel,
            std::future::pending(),
            Some(Duration::from_secs(5)),
        )
        .await;

        assert_eq!(interruption, Some(Interruption::Deadline(Duration::from_secs(5))));
        assert!(matches!(
            result,
            Err(ProvisionError::Cancelled {
                stage: ProvisioningStage::WaitingForPodReady
            })
        ));
        assert!(cancel.is_cancelled());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_cancels_provisioning() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let (result, interruption) = provision_until_interrupted(
            cancelled_at_pod_stage(&cancel),
            &cancel,
            async { Ok(()) },
            Some(Duration::from_secs(60)),
        )
        .await;

        assert_eq!(interruption, Some(Interruption::Signal));
        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_signal_handler_falls_back_to_deadline() {
        let cancel = CancellationToken::new();

        let (_, interruption) = provision_until_interrupted(
            cancelled_at_pod_stage(&cancel),
            &cancel,
            async { Err(std::io::Error::other("signal handler unavailable")) },
            Some(Duration::from_secs(3)),
        )
        .await;

        assert_eq!(interruption, Some(Interruption::Deadline(Duration::from_secs(3))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_run_is_not_interrupted() {
        let cancel = CancellationToken::new();

        let (result, interruption) = provision_until_interrupted(
            async { Ok(ProvisioningResult::default()) },
            &cancel,
            std::future::pending(),
            None,
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(interruption, None);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_interruption_message() {
        assert_eq!(Interruption::Signal.to_string(), "Interrupted");
        assert_eq!(
            Interruption::Deadline(Duration::from_secs(120)).to_string(),
            "Workspace not ready after 120 seconds"
        );
    }
}
