// Device Auth Rate Limiter - Main Entry Point
//
// Operator tooling around the device admission controller:
// - Validate the quota configuration before a rollout
// - Simulate admissions for a tenant
// - Serve admission metrics, reloading the quota table on SIGHUP

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deviceauth_ratelimit::config::{Config, MetricsConfig};
use deviceauth_ratelimit::metrics_server;
use deviceauth_ratelimit::rate_limit::{AdmissionController, RateLimitConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Per-tenant admission control for device requests
#[derive(Parser, Debug)]
#[command(name = "deviceauth-ratelimit")]
#[command(version = "0.1.0")]
#[command(about = "Quota-driven admission control for device requests", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/deviceauth/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the rate limit configuration and print the quota table
    Check {
        /// Print the effective configuration as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a burst of admissions for one tenant
    Simulate {
        /// Tenant identifier
        #[arg(long)]
        tenant: String,

        /// Tenant plan
        #[arg(long)]
        plan: Option<String>,

        /// Number of requests to issue
        #[arg(long, default_value_t = 1)]
        requests: u32,
    },
    /// Serve admission metrics until interrupted
    Serve {
        /// Metrics port; serves metrics even if disabled in configuration
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    init_tracing(&config, args.verbose)?;

    match args.command {
        Commands::Check { json } => check(&config, json)?,
        Commands::Simulate {
            tenant,
            plan,
            requests,
        } => simulate(&config, &tenant, plan.as_deref(), requests)?,
        Commands::Serve { port } => serve(config, args.config, port).await?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

/// Validate the quota settings and print the effective table
fn check(config: &Config, json: bool) -> Result<()> {
    let limits = config.rate_limits()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&limits)?);
        return Ok(());
    }

    print_limits(&limits);
    Ok(())
}

fn print_limits(limits: &RateLimitConfig) {
    if !limits.enabled {
        println!("Device rate limiting: disabled");
        return;
    }

    println!("Device rate limiting: enabled");
    println!("Interval: {:?}", limits.interval);
    println!("Default quota: {}", limits.default_quota);
    if limits.plans.is_empty() {
        println!("Plans: none");
    } else {
        println!("Plans:");
        for (plan, quota) in limits.plans.sorted() {
            println!("  {} = {}", plan, quota);
        }
    }
}

/// Issue `requests` admissions for one tenant and report the outcome
fn simulate(config: &Config, tenant: &str, plan: Option<&str>, requests: u32) -> Result<()> {
    let controller = AdmissionController::new(config.rate_limits()?);

    let allowed = (0..requests)
        .filter(|_| controller.admit(tenant, plan).is_allowed())
        .count();

    println!("Allowed: {}", allowed);
    println!("Denied: {}", requests as usize - allowed);
    Ok(())
}

async fn serve(config: Config, path: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let controller = Arc::new(
        AdmissionController::from_settings(&config.settings)
            .context("Invalid device rate limit configuration")?,
    );

    let cleanup = controller
        .start_cleanup_task(Duration::from_secs(config.metrics.cleanup_interval_secs));

    #[cfg(unix)]
    spawn_reload_on_hangup(Arc::clone(&controller), path)?;
    #[cfg(not(unix))]
    let _ = path;

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    };
    let result = match metrics_port(&config.metrics, port) {
        Some(port) => metrics_server::start_metrics_server(port, shutdown).await,
        None => {
            info!("Metrics endpoint disabled");
            shutdown.await;
            Ok(())
        }
    };

    cleanup.abort();
    result
}

/// Port to serve metrics on; an explicit `--port` enables the endpoint
fn metrics_port(metrics: &MetricsConfig, port: Option<u16>) -> Option<u16> {
    match port {
        Some(port) => Some(port),
        None if metrics.enabled => Some(metrics.port),
        None => None,
    }
}

/// Reload the quota table whenever the process receives SIGHUP
#[cfg(unix)]
fn spawn_reload_on_hangup(
    controller: Arc<AdmissionController>,
    path: Option<PathBuf>,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, reloading configuration");
            match load_config(path.as_deref()) {
                Ok(config) => {
                    // Rejected reloads are logged by the controller
                    let _ = controller.reload_from_settings(&config.settings);
                }
                Err(e) => tracing::error!("Failed to reload configuration: {:#}", e),
            }
        }
    });

    Ok(())
}
