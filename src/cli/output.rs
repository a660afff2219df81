// Output formatting and display for CLI

use crate::config::DaemonConfig;
use crate::process::{ServerRecord, ServerStatus};
use chrono::Utc;
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a table of deployed servers.
///
/// `status` is the status to show for every row; offline listings only know
/// whether a daemon currently owns the servers.
pub fn print_server_table(records: &[ServerRecord], status: Option<ServerStatus>) {
    if records.is_empty() {
        println!("{}", "No servers are deployed".yellow());
        return;
    }

    #[derive(Tabled)]
    struct ServerRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Game")]
        game: String,
        #[tabled(rename = "Port")]
        port: u16,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Deployed")]
        deployed: String,
    }

    let now = Utc::now();
    let rows: Vec<ServerRow> = records
        .iter()
        .map(|r| ServerRow {
            id: truncate(r.id.as_str(), 13),
            name: truncate(&r.config.name, 20),
            game: r.config.game_type.clone(),
            port: r.config.port,
            status: status
                .map(format_status_colored)
                .unwrap_or_else(|| "managed".dimmed().to_string()),
            deployed: format!(
                "{} ago",
                format_duration(&(now - r.created_at).to_std().unwrap_or_default())
            ),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} server(s)", records.len())
            .dimmed()
            .italic()
    );
}

/// Print a newly deployed server
pub fn print_deployed(record: &ServerRecord) {
    print_success_msg(&format!("Deployed {}", record.config.name.cyan()));
    println!("  {:<10} {}", "ID:".bold(), record.id);
    println!("  {:<10} {}", "Game:".bold(), record.config.game_type);
    println!("  {:<10} {}", "Port:".bold(), record.config.port);
    println!(
        "  {:<10} {}",
        "Path:".bold(),
        record.config.install_path.display()
    );
}

/// Summarize a validated daemon configuration
pub fn print_config_summary(config: &DaemonConfig) {
    println!("\n{}", "Daemon Configuration".bold().underline());
    println!();
    println!(
        "  {:<16} {}:{}",
        "Gateway:".bold(),
        config.gateway.bind,
        config.gateway.port
    );
    println!(
        "  {:<16} {}",
        "Device name:".bold(),
        config.gateway.resolved_device_name().cyan()
    );
    let remote_deploy = if config.gateway.deploy_roots.is_empty() {
        "disabled".dimmed().to_string()
    } else {
        config
            .gateway
            .deploy_roots
            .iter()
            .map(|root| root.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!("  {:<16} {}", "Remote deploy:".bold(), remote_deploy);
    println!(
        "  {:<16} every {}",
        "Monitor:".bold(),
        format_duration(&config.monitor.interval())
    );
    println!(
        "  {:<16} {} within {}",
        "Restart limit:".bold(),
        config.thresholds.max_restart_count,
        format_duration(&config.thresholds.restart_cooldown())
    );
    println!(
        "  {:<16} {}",
        "State file:".bold(),
        config.paths.state_file().display()
    );
    println!("  {:<16} {}", "Logs:".bold(), config.paths.log_dir().display());
    println!(
        "  {:<16} {}",
        "Backups:".bold(),
        config.paths.backup_dir().display()
    );
    println!();
}

/// Format a server status with color coding
pub fn format_status_colored(status: ServerStatus) -> String {
    let label = status.to_string();
    match status {
        ServerStatus::Running => label.green().to_string(),
        ServerStatus::Starting | ServerStatus::Stopping => label.yellow().to_string(),
        ServerStatus::Stopped => label.bright_black().to_string(),
        ServerStatus::Crashed | ServerStatus::Error => label.red().to_string(),
        ServerStatus::CrashLooping => label.red().bold().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
