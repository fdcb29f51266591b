//! `kubectl debug-cde` plugin.
//!
//! Creates a copy of a Pod with an extra sidecar container running an IDE and including the
//! source code of the application, so the live workload can be debugged from the browser.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use debug_cde::commands::debug_cde::DebugCdeCommand;
use debug_cde::ui;

/// Create a copy of a Pod and add a Cloud Development Environment to debug it.
#[derive(Parser)]
#[command(
    name = "kubectl debug-cde",
    bin_name = "kubectl debug-cde",
    version,
    about = "Create a copy of a Pod and add a Cloud Development Environment to debug it",
    after_help = "Example:\n  \
                  # Copy the Pod <pod-name> with an IDE sidecar and the <repository-url> source code\n  \
                  kubectl debug-cde <pod-name> --image <debug-image> --git-repository <repository-url>"
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    command: DebugCdeCommand,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,debug_cde=debug,kube=info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli.command.run().await {
        ui::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}
