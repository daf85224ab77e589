//! bcast - broadcast a template repo's files out to a fleet of target repos.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bcast_core::config::{load_and_validate_config, load_config};
use bcast_core::validation::{Validate, ValidationLevel};
use bcast_hub::{GhCliHubClient, HubClient};
use bcast_transform::DefaultTransformChain;
use bcast_vcs::{GitCliClient, GitClient};
use bcastd::metrics_recorder::{MetricsRecorder, NullMetricsRecorder, SqliteMetricsRecorder};
use bcastd::options::Options;
use bcastd::state::{GitStateDiscoverer, StateDiscoverer};
use bcastd::{batch_processor::BatchProcessor, Engine};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bcast")]
#[command(about = "Broadcast files from a template repository to a fleet of targets")]
#[command(version)]
struct Cli {
    /// Path to the broadcast config file
    #[arg(long, global = true, default_value = "broadcast.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync across every configured group
    Sync {
        /// Compute and report changes without writing, committing, or opening PRs
        #[arg(long)]
        dry_run: bool,
        /// Sync targets even when they're already up to date
        #[arg(long)]
        force: bool,
        /// Push an updated commit to branches with an already-open sync PR
        #[arg(long)]
        update_existing_prs: bool,
        /// Maximum number of targets synced concurrently within a group
        #[arg(long)]
        max_concurrency: Option<i64>,
        /// Per-repository deadline; a target still running past this is
        /// failed with a deadline-exceeded error instead of hanging
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Only run these groups (by id or name); repeatable
        #[arg(long = "group")]
        groups: Vec<String>,
        /// Skip these groups (by id or name); repeatable
        #[arg(long = "skip-group")]
        skip_groups: Vec<String>,
        /// Only sync these target repos; repeatable
        #[arg(long = "target")]
        targets: Vec<String>,
        /// Path to a sqlite database to record run metrics into
        #[arg(long)]
        metrics_db: Option<PathBuf>,
        /// Directory to append a JSONL event log to
        #[arg(long)]
        event_log: Option<PathBuf>,
        /// Output the final results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a config file's structure without running a sync
    Validate,
    /// Inspect the groups declared in a config file
    Groups {
        #[command(subcommand)]
        action: GroupsAction,
    },
}

#[derive(Subcommand)]
enum GroupsAction {
    /// List every group, its priority and dependencies
    List,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            dry_run,
            force,
            update_existing_prs,
            max_concurrency,
            timeout_secs,
            groups,
            skip_groups,
            targets,
            metrics_db,
            event_log,
            json,
        } => run_sync(
            &cli.config,
            SyncArgs {
                dry_run,
                force,
                update_existing_prs,
                max_concurrency,
                timeout_secs,
                groups,
                skip_groups,
                targets,
                metrics_db,
                event_log,
                json,
            },
        ),
        Commands::Validate => run_validate(&cli.config),
        Commands::Groups { action } => match action {
            GroupsAction::List => run_groups_list(&cli.config),
        },
    }
}

struct SyncArgs {
    dry_run: bool,
    force: bool,
    update_existing_prs: bool,
    max_concurrency: Option<i64>,
    timeout_secs: Option<u64>,
    groups: Vec<String>,
    skip_groups: Vec<String>,
    targets: Vec<String>,
    metrics_db: Option<PathBuf>,
    event_log: Option<PathBuf>,
    json: bool,
}

fn run_sync(config_path: &std::path::Path, args: SyncArgs) -> anyhow::Result<()> {
    let config = load_and_validate_config(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let mut options = Options::default();
    options.dry_run = args.dry_run;
    options.force = args.force;
    options.update_existing_prs = args.update_existing_prs;
    options.group_filter = args.groups;
    options.skip_groups = args.skip_groups;
    options.target_filter = args.targets;
    if let Some(value) = args.max_concurrency {
        options.set_max_concurrency(value);
    }
    if let Some(secs) = args.timeout_secs {
        options.timeout = Duration::from_secs(secs);
    }

    let git: Arc<dyn GitClient> = Arc::new(GitCliClient::default());
    let hub: Arc<dyn HubClient> = Arc::new(GhCliHubClient::default());
    let batch = Arc::new(BatchProcessor::new(Arc::clone(&hub), Arc::new(DefaultTransformChain)));
    let discoverer: Arc<dyn StateDiscoverer> = Arc::new(GitStateDiscoverer::new(Arc::clone(&hub)));

    let mut engine = Engine::new(git, hub, batch, discoverer);

    // Cooperative shutdown: a Ctrl-C or SIGTERM sets the flag instead of
    // killing the process, so in-flight targets finish their current
    // checkpoint and report a clean `Cancelled` outcome.
    let shutdown = engine.shutdown_flag();
    {
        let flag = shutdown.clone();
        signal_hook::flag::register(signal_hook::consts::SIGINT, flag.clone())
            .with_context(|| "registering SIGINT handler")?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, flag)
            .with_context(|| "registering SIGTERM handler")?;
    }

    let metrics: Arc<dyn MetricsRecorder> = match &args.metrics_db {
        Some(path) => Arc::new(
            SqliteMetricsRecorder::open(path).with_context(|| format!("opening metrics db {}", path.display()))?,
        ),
        None => Arc::new(NullMetricsRecorder),
    };
    engine = engine.with_metrics(metrics);

    if let Some(root) = &args.event_log {
        let log = bcast_core::JsonlEventLog::new(root.clone());
        log.ensure_layout().with_context(|| format!("preparing event log at {}", root.display()))?;
        engine = engine.with_event_log(Arc::new(log));
    }

    let results = engine.run(&config, &options);

    match results {
        Ok(results) => {
            print_results(&results, args.json);
            Ok(())
        }
        Err(err) => {
            if !args.json {
                eprintln!("sync failed: {err}");
            } else {
                println!("{{\"error\": {:?}}}", err.to_string());
            }
            Err(anyhow::anyhow!(err))
        }
    }
}

fn print_results(results: &bcast_core::Results, json: bool) {
    if json {
        let payload = serde_json::json!({
            "successful": results.successful,
            "failed": results.failed,
            "skipped": results.skipped,
            "duration_ms": results.duration_ms,
            "dry_run": results.dry_run,
            "errors": results.errors,
        });
        println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
        return;
    }

    println!(
        "sync complete: {} succeeded, {} failed, {} skipped ({} ms){}",
        results.successful,
        results.failed,
        results.skipped,
        results.duration_ms,
        if results.dry_run { " [dry run]" } else { "" }
    );
    for (repo, message) in &results.errors {
        println!("  {repo}: {message}");
    }
}

fn run_validate(config_path: &std::path::Path) -> anyhow::Result<()> {
    let config = load_config(config_path).with_context(|| format!("loading {}", config_path.display()))?;
    let issues = config.validate();

    if issues.is_empty() {
        println!("{} is valid", config_path.display());
        return Ok(());
    }

    for issue in &issues {
        let label = match issue.level {
            ValidationLevel::Error => "error",
            ValidationLevel::Warning => "warning",
        };
        println!("[{label}] {}: {}", issue.code, issue.message);
    }

    if issues.iter().any(|issue| issue.level == ValidationLevel::Error) {
        anyhow::bail!("config validation failed");
    }
    Ok(())
}

fn run_groups_list(config_path: &std::path::Path) -> anyhow::Result<()> {
    let config = load_config(config_path).with_context(|| format!("loading {}", config_path.display()))?;

    println!("{:<16} {:<24} {:<8} {:<8} {}", "ID", "NAME", "ENABLED", "PRIORITY", "DEPENDS ON");
    println!("{}", "-".repeat(80));
    for group in &config.groups {
        let deps: Vec<&str> = group.depends_on.iter().map(String::as_str).collect();
        println!(
            "{:<16} {:<24} {:<8} {:<8} {}",
            group.id,
            group.name,
            group.is_enabled(),
            group.priority,
            if deps.is_empty() { "-".to_string() } else { deps.join(", ") }
        );
        for target in &group.targets {
            println!("    -> {}", target.repo);
        }
    }
    Ok(())
}
