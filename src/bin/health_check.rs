//! Health check CLI.
//!
//! Statistics survive between invocations through a JSON state file.

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use view_service::app::health_monitor;
use view_service::health::{ErrorStats, HealthMonitor, HealthSnapshot};
use view_service::{Config, Result};

#[derive(Parser)]
#[command(name = "health-check")]
#[command(about = "Inspect and probe data backend health", long_about = None)]
struct Cli {
    /// Persisted monitor state (default <cache_dir>/health_state.json)
    #[arg(long, global = true, env = "FINSKILLS_HEALTH_STATE")]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the backend
    Check {
        /// Ignore the cached probe result
        #[arg(long)]
        force: bool,
    },

    /// Show call statistics
    Stats {
        /// Only this tool
        #[arg(long)]
        tool: Option<String>,
    },

    /// Reset call statistics
    Reset {
        /// Only this tool
        #[arg(long)]
        tool: Option<String>,
    },

    /// Show the health summary
    Summary {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    view_service::observability::init_tracing();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = Config::load()?;
    let state = cli
        .state
        .unwrap_or_else(|| config.provider.cache_dir.join("health_state.json"));

    let monitor = health_monitor(&config)?;
    if let Some(snapshot) = load_state(&state).await {
        monitor.restore(snapshot).await;
    }

    let code = match cli.command {
        Commands::Check { force } => cmd_check(&monitor, force).await,
        Commands::Stats { tool } => cmd_stats(&monitor, tool.as_deref()).await,
        Commands::Reset { tool } => cmd_reset(&monitor, tool.as_deref()).await,
        Commands::Summary { json } => cmd_summary(&monitor, json).await?,
    };

    save_state(&state, &monitor.snapshot().await).await?;
    Ok(code)
}

async fn load_state(path: &Path) -> Option<HealthSnapshot> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&text) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "health_state_unreadable");
            None
        }
    }
}

async fn save_state(path: &Path, snapshot: &HealthSnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(snapshot)?).await?;
    Ok(())
}

fn fmt_time(t: &DateTime<Local>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

async fn cmd_check(monitor: &HealthMonitor, force: bool) -> ExitCode {
    println!("Running backend health check...");
    let result = monitor.check_health(force).await;

    println!();
    println!("Status: {}", if result.is_healthy { "healthy" } else { "UNHEALTHY" });
    println!("Checked at: {}", fmt_time(&result.check_time));
    println!(
        "Response time: {:.3}s ({:.1}ms)",
        result.response_time,
        result.response_time * 1000.0
    );
    if let Some(error) = &result.error {
        println!("Error: {}", error);
    }
    if !result.details.is_empty() {
        println!("\nDetails:");
        for (key, value) in &result.details {
            println!("  {}: {}", key, value);
        }
    }

    if result.is_healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_stats(stats: &ErrorStats) {
    println!("Total calls: {}", stats.total_calls);
    println!("Failed calls: {}", stats.failed_calls);
    if stats.total_calls > 0 {
        println!("Success rate: {:.2}%", stats.success_rate());
    }
    println!("Consecutive failures: {}", stats.consecutive_failures);
    if let Some(t) = &stats.last_error_time {
        println!("\nLast error at: {}", fmt_time(t));
        println!("Last error: {}", stats.last_error_message.as_deref().unwrap_or(""));
    }
}

async fn cmd_stats(monitor: &HealthMonitor, tool: Option<&str>) -> ExitCode {
    if let Some(tool) = tool {
        let stats = monitor.get_stats(Some(tool)).await;
        println!("\nTool: {}", tool);
        print_stats(&stats);

        if !stats.error_types.is_empty() {
            println!("\nError types:");
            let mut types: Vec<_> = stats.error_types.iter().collect();
            types.sort_by(|a, b| b.1.cmp(a.1));
            for (kind, count) in types {
                println!("  {}: {}", kind, count);
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("\nGlobal:");
    print_stats(&monitor.get_stats(None).await);

    let all = monitor.get_all_stats().await;
    if !all.is_empty() {
        println!("\nTools ({}):", all.len());
        let mut tools: Vec<_> = all.iter().collect();
        tools.sort_by(|a, b| b.1.failed_calls.cmp(&a.1.failed_calls));
        for (name, stats) in tools.into_iter().take(10).filter(|(_, s)| s.total_calls > 0) {
            println!(
                "  {}: {} calls, {} failed ({:.1}% ok)",
                name,
                stats.total_calls,
                stats.failed_calls,
                stats.success_rate()
            );
        }
    }
    ExitCode::SUCCESS
}

async fn cmd_reset(monitor: &HealthMonitor, tool: Option<&str>) -> ExitCode {
    monitor.reset_stats(tool).await;
    match tool {
        Some(tool) => println!("Reset statistics for {}", tool),
        None => println!("Reset all statistics"),
    }
    ExitCode::SUCCESS
}

async fn cmd_summary(monitor: &HealthMonitor, json: bool) -> Result<ExitCode> {
    let summary = monitor.get_health_summary().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("\n=== Backend health summary ===\n");
    let status = match summary.is_healthy {
        Some(true) => "healthy",
        Some(false) => "UNHEALTHY",
        None => "not checked",
    };
    println!("Status: {}", status);
    println!("Degraded: {}", if summary.is_degraded { "YES" } else { "no" });
    if let Some(t) = &summary.last_check_time {
        println!("Last check: {}", fmt_time(t));
    }
    if let Some(rt) = summary.response_time {
        println!("Response time: {:.3}s", rt);
    }

    let global = &summary.global_stats;
    println!("\nGlobal:");
    println!("  Calls: {}", global.total_calls);
    println!("  Failed: {}", global.failed_calls);
    println!("  Success rate: {}%", global.success_rate);
    println!("  Consecutive failures: {}", global.consecutive_failures);
    if let Some(t) = &global.last_error_time {
        println!("\nLast error:");
        println!("  At: {}", fmt_time(t));
        println!("  Message: {}", global.last_error_message.as_deref().unwrap_or(""));
    }

    if let Some(info) = &summary.degradation_info {
        println!("\nDegradation:");
        if let Some(t) = &info.degradation_start_time {
            println!("  Since: {}", fmt_time(t));
        }
        println!("  Threshold: {} consecutive failures", info.threshold);
    }
    Ok(ExitCode::SUCCESS)
}
