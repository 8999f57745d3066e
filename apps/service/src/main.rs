use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use logger::{LevelFilter, LogFormat};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use regionpulse_service::config::{Config, MAX_HORIZON_DAYS};
use regionpulse_service::database::open_store;
use regionpulse_service::flags::StaticFlags;
use regionpulse_service::monitoring::{MonitoringScheduler, PostgresConnector, ProbeKind, SweepConfig};
use regionpulse_service::orchestrator::{CallContext, ProbeOrchestrator, RetentionPolicy, RetentionSweeper};
use regionpulse_service::registry::RegionRegistry;

/// regionpulse - regional database probes and health history
#[derive(Parser, Debug)]
#[command(name = "regionpulse")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "REGIONPULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Actor key passed to the enablement provider and the audit log
    #[arg(long, global = true)]
    actor: Option<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    /// Use JSON log format instead of compact
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured regions
    Regions {
        /// Print map coordinates of enabled regions only
        #[arg(long)]
        locations: bool,
    },
    /// Open one connection and report server identity
    Test { region: String },
    /// Measure round-trip latency
    Latency {
        region: String,
        /// Number of connect + query cycles
        #[arg(short = 'n', long)]
        iterations: Option<u32>,
    },
    /// Run concurrent connect + query units
    Load {
        region: String,
        #[arg(short = 'c', long)]
        concurrency: Option<u32>,
    },
    /// Collect server health metrics
    Health { region: String },
    /// Probe every enabled region at once
    TestAll {
        #[arg(short, long, default_value = "connection")]
        kind: ProbeKind,
    },
    /// Show stored results, newest first
    History {
        /// Region to show; all enabled regions when omitted
        region: Option<String>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Print the headline metric of one probe kind instead of full results
        #[arg(long)]
        series: Option<ProbeKind>,
    },
    /// Aggregate stored results over a window
    Summary {
        /// Region to summarize; the rolling 24h view of every region when omitted
        region: Option<String>,
        #[arg(short, long, default_value = "86400")]
        window_secs: u64,
    },
    /// Delete results older than the retention horizon
    Reclaim {
        /// Override retention.horizon_days
        #[arg(long)]
        horizon_days: Option<u64>,
    },
    /// Probe all regions periodically until interrupted
    Watch {
        #[arg(short, long, value_delimiter = ',', default_value = "connection")]
        kinds: Vec<ProbeKind>,
        #[arg(short, long, default_value = "60")]
        interval_secs: u64,
    },
    /// Print the effective configuration
    Config,
}

struct App {
    config: Config,
    orchestrator: ProbeOrchestrator,
    ctx: CallContext,
}

impl App {
    async fn build(config: Config, actor: Option<String>) -> Result<Self> {
        let registry = RegionRegistry::from_config(&config.regions, |var| std::env::var(var).ok())?;
        if registry.is_empty() {
            warn!("No regions configured");
        }
        let store = open_store(&config.database.path, config.database.pool_size)
            .await
            .with_context(|| format!("failed to open result store at {}", config.database.path.display()))?;

        let orchestrator = ProbeOrchestrator::new(
            Arc::new(registry),
            Arc::new(PostgresConnector::default()),
            Arc::new(store),
            &config.probes,
        );
        let mut ctx = CallContext::new(Arc::new(StaticFlags::from(&config.flags)));
        if let Some(actor) = actor {
            ctx = ctx.with_actor(actor);
        }

        Ok(Self { config, orchestrator, ctx })
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_ref())?;

    let level = match cli.log_level {
        Some(level) => level,
        None => config.logging.level.parse().unwrap_or(LevelFilter::INFO),
    };
    let format = if cli.json_logs { LogFormat::Json } else { config.logging.format.parse().unwrap_or_default() };
    logger::init(level, format);

    if let Commands::Config = cli.command {
        println!("{config}");
        return Ok(());
    }

    let app = App::build(config, cli.actor).await?;
    run(app, cli.command).await
}

async fn run(app: App, command: Commands) -> Result<()> {
    let App { config, orchestrator, ctx } = app;

    match command {
        Commands::Regions { locations: true } => print_json(&orchestrator.region_locations(&ctx))?,
        Commands::Regions { locations: false } => {
            let regions: Vec<_> = orchestrator
                .registry()
                .all()
                .map(|region| {
                    json!({
                        "id": region.id,
                        "display_name": region.display_name,
                        "address": region.endpoint.address(),
                        "database": region.endpoint.database,
                        "tls": region.endpoint.tls,
                        "enabled": orchestrator.region_enabled(region, &ctx),
                        "latitude": region.latitude,
                        "longitude": region.longitude,
                    })
                })
                .collect();
            print_json(&regions)?;
        }
        Commands::Test { region } => print_json(&orchestrator.test_connection(&region, &ctx).await?)?,
        Commands::Latency { region, iterations } => {
            let iterations = iterations.unwrap_or(config.probes.default_iterations);
            print_json(&orchestrator.measure_latency(&region, iterations, &ctx).await?)?;
        }
        Commands::Load { region, concurrency } => {
            let concurrency = concurrency.unwrap_or(config.probes.default_concurrency);
            print_json(&orchestrator.run_load_test(&region, concurrency, &ctx).await?)?;
        }
        Commands::Health { region } => print_json(&orchestrator.inspect_health(&region, &ctx).await?)?,
        Commands::TestAll { kind } => print_json(&orchestrator.dispatch_all(kind, &ctx).await?)?,
        Commands::History { region, limit, series } => match (region, series) {
            (Some(region), Some(kind)) => print_json(&orchestrator.get_metric_series(&region, kind, limit).await?)?,
            (Some(region), None) => print_json(&orchestrator.get_recent(&region, limit).await?)?,
            (None, None) => print_json(&orchestrator.get_recent_all(limit, &ctx).await?)?,
            (None, Some(_)) => bail!("--series needs a region"),
        },
        Commands::Summary { region: Some(region), window_secs } => {
            print_json(&orchestrator.get_summary(&region, Duration::from_secs(window_secs)).await?)?;
        }
        Commands::Summary { region: None, .. } => print_json(&orchestrator.get_rolling_summary().await?)?,
        Commands::Reclaim { horizon_days } => {
            let mut policy = RetentionPolicy::from(&config.retention);
            if let Some(days) = horizon_days {
                if !(1..=MAX_HORIZON_DAYS).contains(&days) {
                    bail!("--horizon-days must be between 1 and {MAX_HORIZON_DAYS}");
                }
                policy.horizon_days = days;
            }
            let deleted = RetentionSweeper::new(orchestrator.store().clone(), policy).sweep().await?;
            print_json(&json!({ "deleted": deleted }))?;
        }
        Commands::Watch { kinds, interval_secs } => {
            if interval_secs == 0 {
                bail!("--interval-secs must be at least 1");
            }
            watch(&config, orchestrator, ctx, kinds, Duration::from_secs(interval_secs)).await?;
        }
        Commands::Config => println!("{config}"),
    }

    Ok(())
}

async fn watch(
    config: &Config,
    orchestrator: ProbeOrchestrator,
    ctx: CallContext,
    kinds: Vec<ProbeKind>,
    interval: Duration,
) -> Result<()> {
    let sweeper = RetentionSweeper::new(orchestrator.store().clone(), RetentionPolicy::from(&config.retention));
    let retention = sweeper.start_periodic_sweep();

    let (tx, mut rx) = mpsc::channel(16);
    let scheduler = MonitoringScheduler::new(orchestrator, ctx, tx);
    let sweeps = scheduler.schedule_sweeps(kinds.iter().map(|&kind| SweepConfig { kind, interval }).collect());
    info!(kinds = ?kinds, interval_secs = interval.as_secs(), "Watching regions");

    loop {
        tokio::select! {
            batch = rx.recv() => {
                let Some(batch) = batch else { break };
                let line = json!({ "kind": batch.kind, "results": batch.results });
                println!("{}", serde_json::to_string(&line)?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping sweeps");
                break;
            }
        }
    }

    for handle in sweeps {
        handle.abort();
    }
    retention.abort();
    Ok(())
}
