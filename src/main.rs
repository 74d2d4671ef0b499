use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cascade_planner::cascade::{build_report, AnalysisDepth, GapAnalysisReport, KindCounts};
use cascade_planner::config::{Config, ConfigOverrides};
use cascade_planner::gateway::oracle_from_config;
use cascade_planner::notify::engine::item_event;
use cascade_planner::notify::Notifier;
use cascade_planner::output::csv::{
    counts_to_csv, plans_to_csv, queue_to_csv, report_to_csv, stats_to_csv,
};
use cascade_planner::output::json::render_json;
use cascade_planner::output::table::{
    render_counts_table, render_entity_table, render_plan_table, render_plans_table,
    render_queue_table, render_report_table, render_stats_table,
};
use cascade_planner::plan::{parse_objective_arg, CascadeConfig, EntityKind, NewPlan, StrategicPlan};
use cascade_planner::queue::backend::{LocalQueue, QueueBackend, RemoteQueue};
use cascade_planner::queue::drain::{drain_queue, DrainSummary};
use cascade_planner::queue::materialize::{materialize_gaps, uncovered_gaps};
use cascade_planner::queue::{
    rejection_feedback, skip_feedback, validate_quality_score, DemandQueueItem, QueueFilter,
    QueueStats, QueueStatus,
};
use cascade_planner::server::run_server;
use cascade_planner::store::PlanStore;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const REMOTE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "cascade-planner",
    about = "Cascade targets, gap analysis and demand queue for strategic plans"
)]
struct Cli {
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Drafting gateway url; overrides `[gateway] url`.
    #[arg(long, global = true)]
    gateway_url: Option<String>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand)]
    Plan(PlanCommand),
    #[command(subcommand)]
    Entity(EntityCommand),
    Analyze {
        plan_id: String,
        #[arg(long, default_value = "standard")]
        depth: AnalysisDepth,
    },
    Materialize {
        plan_id: String,
        #[arg(long)]
        replace: bool,
    },
    Queue {
        /// Base url of a running server; the local database is used otherwise.
        #[arg(long)]
        remote: Option<String>,
        #[command(subcommand)]
        command: QueueCommand,
    },
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Clone, Default, Args)]
struct CascadeArgs {
    #[arg(long)]
    challenges_per_objective: Option<u32>,
    #[arg(long)]
    pilots_per_challenge: Option<u32>,
    #[arg(long)]
    campaigns_per_objective: Option<u32>,
    #[arg(long)]
    events_per_objective: Option<u32>,
}

impl CascadeArgs {
    fn apply(&self, base: CascadeConfig) -> CascadeConfig {
        CascadeConfig {
            challenges_per_objective: self
                .challenges_per_objective
                .unwrap_or(base.challenges_per_objective),
            pilots_per_challenge: self.pilots_per_challenge.unwrap_or(base.pilots_per_challenge),
            campaigns_per_objective: self
                .campaigns_per_objective
                .unwrap_or(base.campaigns_per_objective),
            events_per_objective: self.events_per_objective.unwrap_or(base.events_per_objective),
        }
    }
}

#[derive(Debug, Subcommand)]
enum PlanCommand {
    Create {
        title: String,
        /// `Title` or `Title:weight`; repeatable.
        #[arg(long = "objective")]
        objectives: Vec<String>,
        #[arg(long)]
        start_year: i32,
        #[arg(long)]
        end_year: i32,
        #[command(flatten)]
        cascade: CascadeArgs,
    },
    List,
    Show {
        plan_id: String,
    },
    SetCascade {
        plan_id: String,
        #[command(flatten)]
        cascade: CascadeArgs,
    },
}

#[derive(Debug, Subcommand)]
enum EntityCommand {
    Add {
        plan_id: String,
        kind: EntityKind,
        title: String,
        /// JSON payload stored with the entity.
        #[arg(long)]
        payload: Option<String>,
    },
    Remove {
        entity_id: String,
    },
    Counts {
        plan_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum QueueCommand {
    List {
        plan_id: String,
        #[arg(long)]
        status: Option<QueueStatus>,
        #[arg(long)]
        entity_type: Option<EntityKind>,
    },
    /// Claims the next pending item of a type.
    Next {
        plan_id: String,
        entity_type: EntityKind,
    },
    Complete {
        item_id: String,
        entity_id: String,
        #[arg(long)]
        score: i64,
        #[arg(long)]
        entity_type: EntityKind,
    },
    Skip {
        item_id: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    Reject {
        item_id: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    Release {
        item_id: String,
    },
    Delete {
        item_id: String,
    },
    /// Deletes every pending item of a plan.
    Clear {
        plan_id: String,
    },
    Reclaim {
        plan_id: String,
        #[arg(long)]
        older_than_minutes: Option<u64>,
    },
    Stats {
        plan_id: String,
    },
    /// Drafts and completes items until the queue for a type is empty.
    Drain {
        plan_id: String,
        entity_type: EntityKind,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(config_path.as_path()))?;
    config.apply_overrides(ConfigOverrides {
        db_path: cli.db.clone(),
        gateway_url: cli.gateway_url.clone(),
    });

    match cli.command {
        Commands::Config { init, show } => handle_config_command(init, show, &config, &config_path),
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let bind = format!("{host}:{port}");
            let addr: SocketAddr = bind
                .parse()
                .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))?;
            run_server(config, addr).await
        }
        Commands::Plan(command) => {
            let store = PlanStore::open(&config.resolved_db_path())?;
            handle_plan_command(command, &store, &config, cli.output)
        }
        Commands::Entity(command) => {
            let store = PlanStore::open(&config.resolved_db_path())?;
            handle_entity_command(command, &store, cli.output)
        }
        Commands::Analyze { plan_id, depth } => {
            let store = PlanStore::open(&config.resolved_db_path())?;
            let report = analyze(&store, &config, &plan_id, depth)?;
            print_report(&report, cli.output)
        }
        Commands::Materialize { plan_id, replace } => {
            let store = PlanStore::open(&config.resolved_db_path())?;
            let report = analyze(&store, &config, &plan_id, AnalysisDepth::Quick)?;
            let plan = require_plan(&store, &plan_id)?;
            let open = store.open_item_counts(&plan.id, !replace)?;
            let rows = materialize_gaps(&plan, &uncovered_gaps(&report.gaps.quantity_gaps, &open));
            let created = store.insert_items(&rows, replace)?;
            info!(plan = %plan_id, created = created.len(), replace, "materialized gaps");
            print_items(&created, cli.output)
        }
        Commands::Queue { remote, command } => {
            let backend = queue_backend(&config, remote.as_deref())?;
            let notifier = queue_notifier(&config, remote.is_some())?;
            handle_queue_command(command, backend, &notifier, &config, cli.output).await
        }
    }
}

fn handle_config_command(init: bool, show: bool, config: &Config, config_path: &Path) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn handle_plan_command(
    command: PlanCommand,
    store: &PlanStore,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    match command {
        PlanCommand::Create {
            title,
            objectives,
            start_year,
            end_year,
            cascade,
        } => {
            let objectives = objectives
                .iter()
                .map(|raw| parse_objective_arg(raw))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let plan = NewPlan {
                title,
                objectives,
                cascade: Some(cascade.apply(config.cascade.ratios)),
                start_year,
                end_year,
            }
            .into_plan(config.cascade.ratios)?;
            store.insert_plan(&plan)?;
            info!(plan = %plan.id, "created plan");
            print_plan(&plan, format)
        }
        PlanCommand::List => {
            let plans = store.list_plans()?;
            match format {
                OutputFormat::Table => println!("{}", render_plans_table(&plans)),
                OutputFormat::Json => println!("{}", render_json(&plans)?),
                OutputFormat::Csv => print!("{}", plans_to_csv(&plans)?),
            }
            Ok(())
        }
        PlanCommand::Show { plan_id } => print_plan(&require_plan(store, &plan_id)?, format),
        PlanCommand::SetCascade { plan_id, cascade } => {
            let current = require_plan(store, &plan_id)?;
            let plan = store
                .update_cascade(&plan_id, &cascade.apply(current.cascade))?
                .ok_or_else(|| anyhow!("strategic plan {plan_id} not found"))?;
            print_plan(&plan, format)
        }
    }
}

fn handle_entity_command(command: EntityCommand, store: &PlanStore, format: OutputFormat) -> Result<()> {
    match command {
        EntityCommand::Add {
            plan_id,
            kind,
            title,
            payload,
        } => {
            require_plan(store, &plan_id)?;
            let payload = payload
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()
                .context("--payload must be valid JSON")?
                .unwrap_or(serde_json::Value::Null);
            let entity = store.insert_entity(&plan_id, kind, &title, payload)?;
            match format {
                OutputFormat::Table => println!("{}", render_entity_table(&entity)),
                OutputFormat::Json | OutputFormat::Csv => println!("{}", render_json(&entity)?),
            }
            Ok(())
        }
        EntityCommand::Remove { entity_id } => {
            if !store.soft_delete_entity(&entity_id)? {
                return Err(anyhow!("entity {entity_id} not found"));
            }
            println!("Removed entity {entity_id}");
            Ok(())
        }
        EntityCommand::Counts { plan_id } => {
            require_plan(store, &plan_id)?;
            print_counts(&store.count_entities(&plan_id)?, format)
        }
    }
}

async fn handle_queue_command(
    command: QueueCommand,
    backend: Arc<dyn QueueBackend>,
    notifier: &Notifier,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    match command {
        QueueCommand::List {
            plan_id,
            status,
            entity_type,
        } => {
            let filter = QueueFilter {
                status,
                entity_type,
            };
            let items = backend.list_items(&plan_id, &filter).await?;
            print_items(&items, format)
        }
        QueueCommand::Next {
            plan_id,
            entity_type,
        } => match backend.claim_next(&plan_id, entity_type).await? {
            Some(item) => print_items(&[item], format),
            None => {
                println!("No pending {entity_type} items for plan {plan_id}");
                Ok(())
            }
        },
        QueueCommand::Complete {
            item_id,
            entity_id,
            score,
            entity_type,
        } => {
            let score = validate_quality_score(score)?;
            let item = backend
                .complete_item(&item_id, &entity_id, entity_type, score)
                .await?;
            publish_item_event(notifier, &item).await;
            print_items(&[item], format)
        }
        QueueCommand::Skip { item_id, reason } => {
            let item = backend
                .update_status(&item_id, QueueStatus::Skipped, Some(skip_feedback(&reason, Utc::now())))
                .await?;
            publish_item_event(notifier, &item).await;
            print_items(&[item], format)
        }
        QueueCommand::Reject { item_id, reason } => {
            let item = backend
                .update_status(
                    &item_id,
                    QueueStatus::Rejected,
                    Some(rejection_feedback(&reason, Utc::now())),
                )
                .await?;
            publish_item_event(notifier, &item).await;
            print_items(&[item], format)
        }
        QueueCommand::Release { item_id } => {
            let item = backend.release_item(&item_id).await?;
            print_items(&[item], format)
        }
        QueueCommand::Delete { item_id } => {
            backend.delete_item(&item_id).await?;
            println!("Deleted queue item {item_id}");
            Ok(())
        }
        QueueCommand::Clear { plan_id } => {
            let deleted = backend.clear_pending(&plan_id).await?;
            println!("Deleted {deleted} pending items for plan {plan_id}");
            Ok(())
        }
        QueueCommand::Reclaim {
            plan_id,
            older_than_minutes,
        } => {
            let minutes = older_than_minutes.unwrap_or(config.queue.stale_claim_minutes);
            let reclaimed = backend.reclaim_stale(&plan_id, minutes).await?;
            println!("Returned {reclaimed} stale claims to pending for plan {plan_id}");
            Ok(())
        }
        QueueCommand::Stats { plan_id } => print_stats(&backend.queue_stats(&plan_id).await?, format),
        QueueCommand::Drain {
            plan_id,
            entity_type,
            limit,
        } => {
            let oracle = oracle_from_config(config)?;
            let limit = limit.unwrap_or(config.queue.drain_limit);
            info!(plan = %plan_id, kind = %entity_type, limit, oracle = oracle.name(), "draining queue");
            let summary =
                drain_queue(backend, oracle.as_ref(), notifier, &plan_id, entity_type, limit).await?;
            print_drain(&summary, format)
        }
    }
}

fn queue_backend(config: &Config, remote: Option<&str>) -> Result<Arc<dyn QueueBackend>> {
    match remote {
        Some(url) => Ok(Arc::new(RemoteQueue::new(
            url,
            Duration::from_secs(REMOTE_TIMEOUT_SECS),
        )?)),
        None => {
            let store = PlanStore::open(&config.resolved_db_path())?;
            Ok(Arc::new(LocalQueue::new(store, config.queue.acceptance_threshold)))
        }
    }
}

/// A server publishes item events for its own transitions, so a remote
/// queue only keeps the drain notification locally.
fn queue_notifier(config: &Config, remote: bool) -> Result<Notifier> {
    let mut notifications = config.notifications.clone();
    if remote {
        let rules = &mut notifications.rules;
        rules.item_accepted = false;
        rules.item_needs_review = false;
        rules.item_skipped = false;
        rules.item_rejected = false;
    }
    Notifier::from_config(&notifications)
}

async fn publish_item_event(notifier: &Notifier, item: &DemandQueueItem) {
    if let Some(event) = item_event(item) {
        notifier.publish(vec![event]).await;
    }
}

fn require_plan(store: &PlanStore, plan_id: &str) -> Result<StrategicPlan> {
    store
        .get_plan(plan_id)?
        .ok_or_else(|| anyhow!("strategic plan {plan_id} not found"))
}

fn analyze(
    store: &PlanStore,
    config: &Config,
    plan_id: &str,
    depth: AnalysisDepth,
) -> Result<GapAnalysisReport> {
    let plan = require_plan(store, plan_id)?;
    let current = store.count_entities(plan_id)?;
    Ok(build_report(&plan, &current, depth, config.cascade.remainder_policy))
}

fn print_plan(plan: &StrategicPlan, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_plan_table(plan)),
        OutputFormat::Json => println!("{}", render_json(plan)?),
        OutputFormat::Csv => print!("{}", plans_to_csv(std::slice::from_ref(plan))?),
    }
    Ok(())
}

fn print_counts(counts: &KindCounts, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_counts_table(counts)),
        OutputFormat::Json => println!("{}", render_json(counts)?),
        OutputFormat::Csv => print!("{}", counts_to_csv(counts)?),
    }
    Ok(())
}

fn print_report(report: &GapAnalysisReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_report_table(report)),
        OutputFormat::Json => println!("{}", render_json(report)?),
        OutputFormat::Csv => print!("{}", report_to_csv(report)?),
    }
    Ok(())
}

fn print_items(items: &[DemandQueueItem], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_queue_table(items)),
        OutputFormat::Json => println!("{}", render_json(items)?),
        OutputFormat::Csv => print!("{}", queue_to_csv(items)?),
    }
    Ok(())
}

fn print_stats(stats: &QueueStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_stats_table(stats)),
        OutputFormat::Json => println!("{}", render_json(stats)?),
        OutputFormat::Csv => print!("{}", stats_to_csv(stats)?),
    }
    Ok(())
}

fn print_drain(summary: &DrainSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", render_json(summary)?),
        OutputFormat::Table | OutputFormat::Csv => {
            if matches!(format, OutputFormat::Csv) {
                warn!("CSV output for drain not implemented, using text");
            }
            println!(
                "Processed {} {} items for plan {}: {} accepted, {} for review{}",
                summary.processed,
                summary.entity_type,
                summary.strategic_plan_id,
                summary.accepted,
                summary.review,
                if summary.hit_limit { " (limit reached)" } else { "" }
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommands() {
        let cli = Cli::try_parse_from([
            "cascade-planner",
            "queue",
            "stats",
            "plan-1",
            "--gateway-url",
            "http://localhost:8080/draft",
            "--db",
            "/tmp/planner.db",
        ])
        .expect("parse");
        assert_eq!(cli.gateway_url.as_deref(), Some("http://localhost:8080/draft"));
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/planner.db")));
        assert!(matches!(
            cli.command,
            Commands::Queue {
                remote: None,
                command: QueueCommand::Stats { .. }
            }
        ));
    }

    #[test]
    fn cascade_flags_override_only_what_is_given() {
        let args = CascadeArgs {
            pilots_per_challenge: Some(4),
            ..CascadeArgs::default()
        };
        let merged = args.apply(CascadeConfig::default());
        assert_eq!(merged.pilots_per_challenge, 4);
        assert_eq!(
            merged.challenges_per_objective,
            CascadeConfig::default().challenges_per_objective
        );
    }
}
