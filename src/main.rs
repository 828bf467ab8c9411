//! CLI entry point for the harvester tool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use harvester_core::store::NewQueryTask;
use harvester_core::{
    AppConfig, ChatSearchClient, Database, Orchestrator, PageFetchProcessor, ProcessingEngine,
    Store,
};
use serde::Serialize;
use tracing::{debug, info, warn};

mod cli;
mod output;

use cli::{Args, Command, ProcessArgs, RunArgs, TaskCommand};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so --json output stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let Some(command) = args.command.clone() else {
        Args::command().print_help()?;
        println!();
        return Ok(());
    };

    let mut config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db_path) = &args.db {
        config.database.path.clone_from(db_path);
    }

    let db = Database::new_with_options(&config.database.path, &config.database_options())
        .await
        .with_context(|| {
            format!(
                "Failed to open database '{}'",
                config.database.path.display()
            )
        })?;
    let store = Store::new(db);

    let result = match command {
        Command::Task(task_command) => run_task_command(&store, task_command, args.json).await,
        Command::Run(run_args) => run_discovery(&store, &config, &run_args, args.json).await,
        Command::Process(process_args) => {
            run_processing(&store, &config, &process_args, args.json).await
        }
        Command::Stats => {
            let stats = store.statistics().await?;
            emit(args.json, &stats, output::render_statistics)
        }
        Command::Stuck => {
            let links = store.stuck_links().await?;
            emit(args.json, &links, |links| output::render_link_list(links))
        }
        Command::Show { link_id } => show_link(&store, link_id, args.json).await,
    };

    store.database().clone().close().await;
    result
}

/// Prints `value` as JSON or through `render`.
fn emit<T, F>(json: bool, value: &T, render: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    if json {
        output::print_json(value)
    } else {
        print!("{}", render(value));
        Ok(())
    }
}

async fn run_task_command(store: &Store, command: TaskCommand, json: bool) -> Result<()> {
    match command {
        TaskCommand::Add {
            name,
            prompt,
            schedule,
            inactive,
        } => {
            store
                .create_task(&NewQueryTask {
                    task_name: &name,
                    prompt_template: &prompt,
                    schedule: schedule.as_deref(),
                    is_active: !inactive,
                })
                .await
                .with_context(|| format!("Failed to create task '{name}'"))?;
            info!(task = %name, "task created");
            let task = store
                .get_task(&name)
                .await?
                .with_context(|| format!("Task '{name}' vanished after creation"))?;
            emit(json, &task, output::render_task)
        }
        TaskCommand::List { all } => {
            let tasks = if all {
                store.list_tasks().await?
            } else {
                store.list_active_tasks().await?
            };
            emit(json, &tasks, |tasks| output::render_task_list(tasks))
        }
        TaskCommand::Show { name } => {
            let task = store
                .get_task(&name)
                .await?
                .with_context(|| format!("Task '{name}' not found"))?;
            emit(json, &task, output::render_task)
        }
        TaskCommand::Enable { name } => set_task_active(store, &name, true, json).await,
        TaskCommand::Disable { name } => set_task_active(store, &name, false, json).await,
    }
}

async fn set_task_active(store: &Store, name: &str, active: bool, json: bool) -> Result<()> {
    store
        .set_task_active(name, active)
        .await
        .with_context(|| format!("Failed to update task '{name}'"))?;
    let task = store
        .get_task(name)
        .await?
        .with_context(|| format!("Task '{name}' not found"))?;
    emit(json, &task, output::render_task)
}

fn build_engine(store: &Store, config: &AppConfig) -> Result<Arc<ProcessingEngine>> {
    let processor = PageFetchProcessor::new(Duration::from_secs(
        config.processing.processing_timeout_secs,
    ))
    .context("Failed to build page fetch processor")?;
    let engine = ProcessingEngine::new(store.clone(), Arc::new(processor), config.engine_options())
        .context("Failed to build processing engine")?;
    Ok(Arc::new(engine))
}

async fn run_discovery(
    store: &Store,
    config: &AppConfig,
    run_args: &RunArgs,
    json: bool,
) -> Result<()> {
    let discovery =
        ChatSearchClient::from_config(&config.discovery).context("Failed to build search client")?;
    let mut orchestrator = Orchestrator::new(store.clone(), Arc::new(discovery));

    let auto_process = config.processing.auto_process && !run_args.no_process;
    if auto_process {
        orchestrator = orchestrator.with_engine(build_engine(store, config)?, true);
    }

    if run_args.all_active {
        let outcomes = orchestrator.run_active_tasks().await?;
        let mut reports = Vec::new();
        let mut failures = 0_usize;
        for outcome in outcomes {
            match outcome.result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    failures += 1;
                    eprintln!("Task '{}' failed: {e}", outcome.task_name);
                }
            }
        }
        emit(json, &reports, |reports| {
            reports.iter().map(output::render_report).collect::<String>()
        })?;
        if failures > 0 {
            bail!("{failures} task run(s) failed");
        }
        return Ok(());
    }

    let Some(name) = run_args.name.as_deref() else {
        bail!("Specify a task name or --all-active");
    };
    let report = orchestrator
        .run_task(name)
        .await
        .with_context(|| format!("Run of task '{name}' failed"))?;
    emit(json, &report, output::render_report)
}

async fn run_processing(
    store: &Store,
    config: &AppConfig,
    process_args: &ProcessArgs,
    json: bool,
) -> Result<()> {
    let engine = build_engine(store, config)?;
    let stats = if process_args.ids.is_empty() {
        let limit = process_args
            .limit
            .unwrap_or(config.processing.pending_batch_limit);
        engine.process_pending(limit).await?
    } else {
        engine.process_specific(&process_args.ids).await?
    };
    if stats.failed > 0 {
        warn!(failed = stats.failed, "some links failed processing");
    }
    emit(json, &stats, output::render_processing_stats)
}

#[derive(Serialize)]
struct LinkDetail<'a> {
    link: &'a harvester_core::Link,
    content: Option<&'a harvester_core::store::ProcessedContent>,
}

async fn show_link(store: &Store, link_id: i64, json: bool) -> Result<()> {
    let link = store
        .get_link(link_id)
        .await?
        .with_context(|| format!("Link {link_id} not found"))?;
    let content = store.get_processed_content(link_id).await?;
    let detail = LinkDetail {
        link: &link,
        content: content.as_ref(),
    };
    emit(json, &detail, |detail| {
        output::render_link_detail(detail.link, detail.content)
    })
}
