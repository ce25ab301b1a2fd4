mod command_daemon;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    vigil_config::VigilConfig,
    vigil_scheduler::{
        DaemonEntry, DaemonRegistry, DaemonScheduler, JobResolver, ResultSink, SchedulingService,
        ServiceOptions, is_valid_cron, registry_memory::InMemoryDaemonRegistry,
    },
};

use crate::command_daemon::{CommandDaemon, LogSink};

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil: cron and interval job scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of vigil.toml in ./ and ~/.config/vigil/).
    #[arg(long, global = true, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engines and run every configured daemon until Ctrl-C.
    Run,
    /// Check whether a cron expression is valid.
    CheckCron {
        /// Expression to check, quoted.
        expression: String,
    },
    /// Show which engine settings resolve and which daemons are declared.
    Status {
        /// Print as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<VigilConfig> {
    match &cli.config {
        Some(path) => Ok(vigil_config::load_config(path)?),
        None => Ok(vigil_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match &cli.command {
        Commands::Run => {
            info!(version = env!("CARGO_PKG_VERSION"), "vigil starting");
            run(load_config(&cli)?).await
        },
        Commands::CheckCron { expression } => {
            if is_valid_cron(expression) {
                println!("valid: {expression}");
                Ok(())
            } else {
                println!("invalid: {expression}");
                std::process::exit(1);
            }
        },
        Commands::Status { json } => status(&load_config(&cli)?, *json),
    }
}

async fn run(config: VigilConfig) -> anyhow::Result<()> {
    let registry = Arc::new(InMemoryDaemonRegistry::new());
    let mut entries = Vec::new();
    let mut ids: Vec<_> = config.daemons.keys().cloned().collect();
    ids.sort();

    for id in ids {
        let Some(daemon_config) = config.daemons.get(&id) else {
            continue;
        };
        let Some(daemon) = CommandDaemon::from_config(&id, daemon_config) else {
            warn!(entry_id = %id, "daemon has no command, skipping");
            continue;
        };
        match DaemonEntry::from_config(&id, daemon_config) {
            Ok(entry) => {
                registry.insert(id.as_str(), Arc::new(daemon));
                entries.push(entry);
            },
            Err(e) => warn!(entry_id = %id, error = %e, "invalid daemon entry, skipping"),
        }
    }

    let resolver = Arc::new(JobResolver::new(registry as Arc<dyn DaemonRegistry>));
    let sink: Arc<dyn ResultSink> = Arc::new(LogSink);
    let service =
        SchedulingService::start(ServiceOptions::from_config(&config), resolver, Some(sink)).await;
    let scheduler = DaemonScheduler::new(Arc::clone(&service), Arc::new(config));

    let mut scheduled = 0usize;
    for entry in &entries {
        if scheduler.schedule(entry).await.is_some() {
            scheduled += 1;
        }
    }
    info!(scheduled, declared = entries.len(), "daemons scheduled, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.shutdown();
    service.shutdown().await;
    Ok(())
}

fn status(config: &VigilConfig, json: bool) -> anyhow::Result<()> {
    let options = ServiceOptions::from_config(config);
    let mut daemons: Vec<_> = config.daemons.iter().collect();
    daemons.sort_by(|a, b| a.0.cmp(b.0));

    if json {
        let value = serde_json::json!({
            "clusterEnabled": options.cluster_enabled,
            "resourceDir": config.engines.resource_dir,
            "local": options.local.as_ref().map(|s| &s.instance_name),
            "clustered": options.clustered.as_ref().map(|s| &s.instance_name),
            "daemons": daemons
                .iter()
                .map(|(id, d)| serde_json::json!({
                    "id": id,
                    "cron": d.cron,
                    "intervalSecs": d.interval_secs,
                    "clusterAffinity": d.disallow_cluster_concurrent_execution,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Resource dir:    {}", config.engines.resource_dir.display());
    println!("Cluster enabled: {}", options.cluster_enabled);
    match &options.local {
        Some(s) => println!(
            "Local engine:    {} ({} workers)",
            s.instance_name, s.thread_count
        ),
        None => println!(
            "Local engine:    no unique match for {}",
            config.engines.local_pattern
        ),
    }
    if options.cluster_enabled {
        match &options.clustered {
            Some(s) => println!(
                "Cluster engine:  {} ({} workers)",
                s.instance_name, s.thread_count
            ),
            None => println!(
                "Cluster engine:  no unique match for {}",
                config.engines.clustered_pattern
            ),
        }
    }

    if daemons.is_empty() {
        println!("No daemons declared.");
    } else {
        println!("Daemons:");
        for (id, d) in daemons {
            let trigger = match (d.cron.as_deref(), d.interval_secs) {
                (Some(cron), _) if !cron.trim().is_empty() => format!("cron '{cron}'"),
                (_, Some(secs)) => format!("every {secs}s"),
                _ => "no trigger".to_string(),
            };
            let affinity = if d.disallow_cluster_concurrent_execution {
                " [cluster]"
            } else {
                ""
            };
            println!("  {id}: {trigger}{affinity}");
        }
    }
    Ok(())
}
