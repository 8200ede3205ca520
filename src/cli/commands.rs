//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::Api;
use crate::config::Settings;
use crate::enrich::EnrichmentService;
use crate::fetch::{CircuitBreaker, FetchClient};
use crate::models::{Estado, Nodo, RunStatus, SourceConfig, WorkflowState};
use crate::nodos::NodoMatcher;
use crate::scheduler::Scheduler;
use crate::sources::AdapterRegistry;
use crate::store::{SqliteStore, TenderStore};

#[derive(Parser)]
#[command(name = "tsweep")]
#[command(about = "Public procurement notice harvesting and research system")]
#[command(version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "TSWEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest sources: the ones named, or every due source
    Run {
        /// Source IDs to run immediately (empty = all due sources)
        source_ids: Vec<String>,
        /// Force every active source regardless of schedule
        #[arg(short, long)]
        all: bool,
    },

    /// Manage harvest sources
    Source {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Manage semantic keyword groups
    Nodo {
        #[command(subcommand)]
        command: NodoCommands,
    },

    /// Download attached documents and extract their text
    Enrich {
        /// Tender IDs to enrich (empty = every record with pending files)
        tender_ids: Vec<String>,
        /// Record ceiling for the batch form
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Recompute time-validity for the whole corpus
    Vigencia,

    /// Override a tender's estado by hand
    Estado {
        tender_id: String,
        /// vigente | vencida | prorrogada | archivada
        estado: String,
        /// Why the system's computed estado is wrong
        #[arg(short, long)]
        reason: String,
    },

    /// Move a tender through the manual workflow
    Workflow {
        tender_id: String,
        /// descubierta | evaluando | preparando | presentada | descartada
        state: String,
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Fold a duplicate tender into its canonical twin
    Merge {
        canonical_id: String,
        duplicate_id: String,
    },

    /// Show recent runs
    History {
        /// Filter by source
        source_id: Option<String>,
        /// Filter by status (running | completed | failed | orphaned)
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show corpus counts and per-source health
    Status,
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Import source definitions from a TOML file
    Import { path: PathBuf },
    /// List configured sources
    List,
    /// Remove a source
    Remove { source_id: String },
}

#[derive(Subcommand)]
enum NodoCommands {
    /// Create or update a group (comma-separated keywords)
    Set {
        id: String,
        name: String,
        keywords: String,
    },
    /// List groups
    List,
    /// Re-match one group against every stored tender
    Rematch { id: String },
    /// Delete a group and drop its memberships
    Remove { id: String },
}

struct Context {
    store: Arc<dyn TenderStore>,
    api: Api,
    scheduler: Arc<Scheduler>,
}

fn build_context(settings: &Settings) -> anyhow::Result<Context> {
    if let Some(parent) = settings.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store: Arc<dyn TenderStore> = Arc::new(SqliteStore::new(&settings.db_path)?);

    let client = FetchClient::with_breaker(settings.fetch_options(), CircuitBreaker::default())?;
    let registry = Arc::new(AdapterRegistry::with_defaults(
        settings.render_endpoint.clone(),
    ));
    let matcher = Arc::new(NodoMatcher::new());
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        client,
        registry,
        matcher.clone(),
        EnrichmentService::new(settings.default_pliego_ratio),
        settings.scheduler_config(),
    ));
    let api = Api::new(
        store.clone(),
        scheduler.clone(),
        matcher,
        settings.archive_after_days,
    );

    Ok(Context {
        store,
        api,
        scheduler,
    })
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let ctx = build_context(&settings)?;

    match cli.command {
        Commands::Run { source_ids, all } => cmd_run(&ctx, source_ids, all).await,
        Commands::Source { command } => cmd_source(&ctx, command).await,
        Commands::Nodo { command } => cmd_nodo(&ctx, command).await,
        Commands::Enrich { tender_ids, limit } => cmd_enrich(&ctx, tender_ids, limit).await,
        Commands::Vigencia => cmd_vigencia(&ctx).await,
        Commands::Estado {
            tender_id,
            estado,
            reason,
        } => cmd_estado(&ctx, &tender_id, &estado, &reason).await,
        Commands::Workflow {
            tender_id,
            state,
            note,
        } => cmd_workflow(&ctx, &tender_id, &state, note.as_deref()).await,
        Commands::Merge {
            canonical_id,
            duplicate_id,
        } => {
            let canonical = ctx.api.merge_tenders(&canonical_id, &duplicate_id).await?;
            println!("{duplicate_id} retired into {}", canonical.id);
            Ok(())
        }
        Commands::History {
            source_id,
            status,
            limit,
        } => cmd_history(&ctx, source_id.as_deref(), status.as_deref(), limit).await,
        Commands::Status => cmd_status(&ctx).await,
    }
}

async fn cmd_run(ctx: &Context, source_ids: Vec<String>, all: bool) -> anyhow::Result<()> {
    if source_ids.is_empty() && !all {
        let outcome = ctx.scheduler.tick().await?;
        println!(
            "{} due={} completed={} failed={} orphans_swept={} documents={}",
            style("tick").green().bold(),
            outcome.due,
            outcome.completed,
            outcome.failed,
            outcome.orphans_swept,
            outcome.documents_enriched
        );
        return Ok(());
    }

    let targets: Vec<String> = if all {
        ctx.store
            .all_sources()
            .await?
            .into_iter()
            .filter(|s| s.active)
            .map(|s| s.id)
            .collect()
    } else {
        source_ids
    };

    let bar = ProgressBar::new(targets.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    for source_id in targets {
        bar.set_message(source_id.clone());
        match ctx.api.trigger_run(&source_id).await {
            Ok(run) => bar.println(format!(
                "{} {}: found={} saved={} updated={} duplicates={} ({})",
                style("run").green(),
                source_id,
                run.counts.found,
                run.counts.saved,
                run.counts.updated,
                run.counts.duplicates,
                run.status.as_str()
            )),
            Err(err) => bar.println(format!("{} {source_id}: {err}", style("error").red())),
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    Ok(())
}

async fn cmd_source(ctx: &Context, command: SourceCommands) -> anyhow::Result<()> {
    match command {
        SourceCommands::Import { path } => {
            #[derive(serde::Deserialize)]
            struct SourceFile {
                #[serde(default)]
                sources: Vec<SourceConfig>,
            }
            let raw = std::fs::read_to_string(&path)?;
            let file: SourceFile = toml::from_str(&raw)?;
            let count = file.sources.len();
            for source in file.sources {
                ctx.store.upsert_source(&source).await?;
            }
            println!("imported {count} sources from {}", path.display());
        }
        SourceCommands::List => {
            for source in ctx.store.all_sources().await? {
                println!(
                    "{:<20} {:<8} {:<8} every {}m  {}",
                    source.id,
                    source.weight.as_str(),
                    if source.active { "active" } else { "paused" },
                    source.effective_interval_minutes(),
                    source.endpoint
                );
            }
        }
        SourceCommands::Remove { source_id } => {
            if ctx.store.delete_source(&source_id).await? {
                println!("removed {source_id}");
            } else {
                println!("no such source: {source_id}");
            }
        }
    }
    Ok(())
}

async fn cmd_nodo(ctx: &Context, command: NodoCommands) -> anyhow::Result<()> {
    match command {
        NodoCommands::Set { id, name, keywords } => {
            let keywords: Vec<String> = keywords
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            let nodo = match ctx.store.get_nodo(&id).await? {
                Some(mut existing) => {
                    existing.name = name;
                    existing.set_keywords(keywords);
                    existing
                }
                None => Nodo::new(id, name, keywords),
            };
            let tagged = ctx.api.upsert_nodo(&nodo).await?;
            println!("saved {} ({} records tagged)", nodo.id, tagged);
        }
        NodoCommands::List => {
            for nodo in ctx.store.all_nodos().await? {
                println!(
                    "{:<20} {:<8} {}",
                    nodo.id,
                    if nodo.active { "active" } else { "paused" },
                    nodo.keywords.join(", ")
                );
            }
        }
        NodoCommands::Rematch { id } => {
            let tagged = ctx.api.rematch_nodo(&id).await?;
            println!("{id}: {tagged} records newly tagged");
        }
        NodoCommands::Remove { id } => {
            if ctx.api.delete_nodo(&id).await? {
                println!("removed {id} and its memberships");
            } else {
                println!("no such nodo: {id}");
            }
        }
    }
    Ok(())
}

async fn cmd_enrich(ctx: &Context, tender_ids: Vec<String>, limit: usize) -> anyhow::Result<()> {
    if tender_ids.is_empty() {
        let enriched = ctx.api.run_document_enrichment(limit).await?;
        println!("{enriched} records gained document text");
        return Ok(());
    }
    for tender_id in tender_ids {
        match ctx.api.enrich_tender_documents(&tender_id).await {
            Ok(count) => println!("{tender_id}: {count} documents extracted"),
            Err(err) => println!("{} {tender_id}: {err}", style("error").red()),
        }
    }
    Ok(())
}

async fn cmd_vigencia(ctx: &Context) -> anyhow::Result<()> {
    let outcome = ctx.api.run_vigencia().await?;
    println!(
        "examined={} expired={} archived={}",
        outcome.examined, outcome.expired, outcome.archived
    );
    Ok(())
}

async fn cmd_estado(
    ctx: &Context,
    tender_id: &str,
    estado: &str,
    reason: &str,
) -> anyhow::Result<()> {
    let estado = Estado::parse(estado)
        .ok_or_else(|| anyhow::anyhow!("unknown estado: {estado}"))?;
    let record = ctx.api.override_estado(tender_id, estado, reason).await?;
    println!("{} -> {}", record.id, record.estado.as_str());
    Ok(())
}

async fn cmd_workflow(
    ctx: &Context,
    tender_id: &str,
    state: &str,
    note: Option<&str>,
) -> anyhow::Result<()> {
    let state = WorkflowState::parse(state)
        .ok_or_else(|| anyhow::anyhow!("unknown workflow state: {state}"))?;
    let record = ctx.api.transition_workflow(tender_id, state, note).await?;
    println!("{} -> {}", record.id, record.workflow_state.as_str());
    Ok(())
}

async fn cmd_history(
    ctx: &Context,
    source_id: Option<&str>,
    status: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let status = match status {
        Some(s) => Some(
            RunStatus::parse(s).ok_or_else(|| anyhow::anyhow!("unknown run status: {s}"))?,
        ),
        None => None,
    };
    for run in ctx.api.run_history(source_id, status, limit).await? {
        println!(
            "{}  {:<20} {:<10} found={:<4} saved={:<4} updated={:<4} duplicates={:<4} errors={}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.source_id,
            run.status.as_str(),
            run.counts.found,
            run.counts.saved,
            run.counts.updated,
            run.counts.duplicates,
            run.errors.len()
        );
    }
    Ok(())
}

async fn cmd_status(ctx: &Context) -> anyhow::Result<()> {
    let tenders = ctx.store.all_tenders().await?;
    let vigentes = tenders
        .iter()
        .filter(|t| t.estado == Estado::Vigente || t.estado == Estado::Prorrogada)
        .count();
    let merged = tenders.iter().filter(|t| t.merged_into.is_some()).count();
    println!(
        "{} tenders ({} current, {} merged away)",
        style(tenders.len()).bold(),
        vigentes,
        merged
    );

    for source in ctx.store.all_sources().await? {
        match ctx.api.source_health(&source.id).await {
            Ok(health) => {
                let freshness = health
                    .last_success_at
                    .map(|at| format!("{}", at.format("%Y-%m-%d %H:%M")))
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<20} success={:>3.0}%  avg={}s  last ok: {}",
                    source.id,
                    health.success_rate * 100.0,
                    health
                        .avg_duration_secs
                        .map(|d| format!("{d:.0}"))
                        .unwrap_or_else(|| "-".to_string()),
                    freshness
                );
            }
            Err(err) => println!("{:<20} health unavailable: {err}", source.id),
        }
    }
    Ok(())
}
