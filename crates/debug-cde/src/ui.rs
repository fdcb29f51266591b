//! UI helpers for the plugin.
//!
//! Provides consistent formatting for console output while the workspace is provisioned.

use std::io::Write;

use colored::Colorize;

fn flush() {
    let _ = std::io::stdout().flush();
}

/// Print the target Pod that is going to be copied.
pub fn print_target_found(pod: &str, namespace: &str) {
    println!(
        "{} found the target pod {} in namespace {}",
        "🎯".bold(),
        pod.cyan().bold(),
        namespace.cyan()
    );
}

/// Print the name of the created workspace.
pub fn print_created_workspace(name: &str, namespace: &str) {
    println!(
        "{} created devworkspace {} in namespace {}",
        "⌨️ ".bold(),
        name.cyan().bold(),
        namespace.cyan()
    );
}

/// Start the deployment availability progress line.
pub fn print_waiting_for_deployment(deployment: &str) {
    print!(
        "{} waiting for the deployment {} to be available...",
        "⏳".bold(),
        deployment.cyan()
    );
    flush();
}

/// Start the pod readiness progress line.
pub fn print_waiting_for_pod(pod: &str) {
    print!("{} waiting for the pod {} to be ready...", "🥑".bold(), pod.cyan());
    flush();
}

/// One more check that came back negative.
pub fn print_progress_dot() {
    print!("{}", ".".bright_black());
    flush();
}

/// Close a progress line on success.
pub fn print_done() {
    println!("{}", "done".green());
}

/// Close a progress line that did not complete.
pub fn end_progress_line() {
    println!();
}

/// Print the IDE URL.
pub fn print_access_url(url: &str) {
    println!(
        "{} click on the following link {} and start debugging",
        "🐞".bold(),
        "⬇️".bold()
    );
    println!();
    println!("{}", url.green().bold().underline());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}
