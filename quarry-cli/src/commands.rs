//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, ExportFormat, StrategyArg};
use anyhow::Context;
use quarry_core::brain::Brain;
use quarry_core::providers::create_provider;
use quarry_core::{
    EventStore, Exporter, FileEventStore, JsonExporter, MarkdownExporter, Orchestrator,
    QuarryConfig, ResearchExport, ResearchRequest, ResearchState, ResearchStatus, WorkerStrategy,
    load_from_events,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    config: QuarryConfig,
    workspace: &Path,
    quiet: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            query,
            strategy,
            timeout,
            fill_gaps,
        } => {
            let mut request = ResearchRequest::from_config(query, &config.research);
            if let Some(strategy) = strategy {
                request = request.with_strategy(strategy.into());
            }
            if let Some(secs) = timeout {
                request = request.with_timeout_secs(secs);
            }
            if fill_gaps {
                request.settings.gap_filling = true;
            }
            run_session(&config, quiet, |orch, cancel| async move {
                orch.start(request, cancel).await
            })
            .await
        }
        Commands::Resume { id } => {
            run_session(&config, quiet, |orch, cancel| async move {
                orch.resume(&id, cancel).await
            })
            .await
        }
        Commands::Expand { id, query } => {
            run_session(&config, quiet, |orch, cancel| async move {
                orch.follow_up(&id, &query, cancel).await
            })
            .await
        }
        Commands::List => handle_list(&config).await,
        Commands::Show { id, events } => handle_show(&config, &id, events).await,
        Commands::Export { id, format, output } => {
            handle_export(&config, &id, format, output).await
        }
        Commands::Config { action } => handle_config(action, &config, workspace),
    }
}

fn handle_config(
    action: ConfigAction,
    config: &QuarryConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = quarry_core::config::write_default_config(workspace)?;
            println!("Configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}

impl From<StrategyArg> for WorkerStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Storm => WorkerStrategy::Storm,
            StrategyArg::React => WorkerStrategy::React,
        }
    }
}

fn open_store(config: &QuarryConfig) -> Arc<FileEventStore> {
    Arc::new(FileEventStore::new(config.store.resolve_event_dir()))
}

fn build_orchestrator(config: &QuarryConfig) -> anyhow::Result<Orchestrator> {
    let provider = create_provider(&config.llm).context("Failed to create LLM provider")?;
    let brain = Arc::new(Brain::new(provider, config.llm.retry.clone()));
    let tools = quarry_tools::create_default_registry(&config.search).into_arc();
    Ok(Orchestrator::new(
        open_store(config),
        brain,
        tools,
        config.research.clone(),
    ))
}

/// Run one orchestrator call with Ctrl-C wired to the cancellation token.
async fn run_session<F, Fut>(config: &QuarryConfig, quiet: bool, call: F) -> anyhow::Result<()>
where
    F: FnOnce(Arc<Orchestrator>, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = quarry_core::Result<ResearchState>>,
{
    let orchestrator = Arc::new(build_orchestrator(config)?);
    let printer = (!quiet).then(|| crate::progress::spawn_printer(orchestrator.bus()));

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, cancelling (the session can be resumed)...");
                cancel.cancel();
            }
        })
    };

    let result = call(Arc::clone(&orchestrator), cancel).await;
    ctrl_c.abort();
    drop(orchestrator);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let state = result?;
    info!(session_id = %state.id, status = %state.status, "Session finished");
    print_outcome(&state);
    match state.status {
        ResearchStatus::Failed => {
            let reason = state
                .failure
                .as_ref()
                .map(|f| format!("{} ({})", f.error, f.phase))
                .unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("Research failed: {}", reason)
        }
        _ => Ok(()),
    }
}

fn print_outcome(state: &ResearchState) {
    match state.status {
        ResearchStatus::Complete => {
            if let Some(report) = &state.report {
                println!("{}", report.full_content);
            }
            eprintln!(
                "\nSession {} complete. Cost: ${:.4} ({} tokens)",
                state.id, state.cost.total_cost_usd, state.cost.total_tokens
            );
        }
        ResearchStatus::Cancelled => {
            eprintln!(
                "\nSession {} cancelled. Resume with: quarry resume {}",
                state.id, state.id
            );
        }
        _ => eprintln!("\nSession {} is {}", state.id, state.status),
    }
}

async fn load_state(
    store: &FileEventStore,
    id: &str,
) -> anyhow::Result<(ResearchState, Vec<quarry_core::Event>)> {
    if !store.exists(id).await? {
        anyhow::bail!("No session with id '{}'", id);
    }
    let events = store.load_events(id).await?;
    let state = load_from_events(id, &events)
        .with_context(|| format!("Session '{}' has an inconsistent event log", id))?;
    Ok((state, events))
}

async fn handle_list(config: &QuarryConfig) -> anyhow::Result<()> {
    let store = open_store(config);
    let ids = store.list_session_ids().await?;
    if ids.is_empty() {
        println!("No sessions in {}", store.base_dir().display());
        return Ok(());
    }
    for id in ids {
        match load_state(&store, &id).await {
            Ok((state, _)) => println!(
                "{:<28} {:<12} {:<6} ${:<8.4} {}",
                state.id,
                state.status.to_string(),
                state.strategy.to_string(),
                state.cost.total_cost_usd,
                state.query
            ),
            Err(e) => warn!(session_id = %id, error = %e, "Skipping unreadable session"),
        }
    }
    Ok(())
}

async fn handle_show(config: &QuarryConfig, id: &str, show_events: bool) -> anyhow::Result<()> {
    let store = open_store(config);
    let (state, events) = load_state(&store, id).await?;

    if show_events {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    println!("Session:   {}", state.id);
    if let Some(parent) = &state.parent_id {
        println!("Parent:    {}", parent);
    }
    println!("Query:     {}", state.query);
    println!("Strategy:  {}", state.strategy);
    println!("Status:    {}", state.status);
    println!("Progress:  {:.0}%", state.progress * 100.0);
    println!(
        "Cost:      ${:.4} ({} tokens)",
        state.cost.total_cost_usd, state.cost.total_tokens
    );
    if let Some(failure) = &state.failure {
        println!("Failure:   {} ({})", failure.error, failure.phase);
    }
    if let Some(reason) = &state.cancellation {
        println!("Cancelled: {}", reason);
    }

    if !state.workers.is_empty() {
        println!("\nWorkers:");
        for worker in state.workers.values() {
            println!(
                "  {:<30} {:<9} {} facts",
                worker.perspective,
                worker.status.to_string(),
                worker.findings.facts.len()
            );
        }
    }
    if let Some(report) = &state.report {
        println!("\n{}", report.full_content);
    }
    Ok(())
}

async fn handle_export(
    config: &QuarryConfig,
    id: &str,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let store = open_store(config);
    let (state, _) = load_state(&store, id).await?;
    let export = ResearchExport::from_state(&state);

    let dir = output.unwrap_or_else(|| config.export.resolve_output_dir());
    let exporter: Box<dyn Exporter> = match format {
        ExportFormat::Json => Box::new(JsonExporter::new(dir)),
        ExportFormat::Markdown => Box::new(MarkdownExporter::new(dir)),
    };
    let path = exporter.export(&export)?;
    println!("Exported to {}", path.display());
    Ok(())
}
