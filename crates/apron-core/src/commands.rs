use std::collections::BTreeMap;
use std::future::Future;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::board::JobBoard;
use crate::cli::{Command, FetchArgs, JobsArgs, ShowArgs, SourceArgs};
use crate::client::ApiClient;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::render::Renderer;
use crate::response::NormalizedResponse;
use crate::task::{TaskId, View};
use crate::tree::find;

const SECRET_KEYS: &[&str] = &["api.token"];

#[instrument(skip(store, cfg, renderer, command))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    command: Option<Command>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = command.unwrap_or_else(|| {
        debug!("no explicit command, listing jobs");
        Command::Jobs(JobsArgs::default())
    });

    match command {
        Command::Fetch(args) => cmd_fetch(store, cfg, &args),
        Command::Jobs(args) => cmd_jobs(store, cfg, renderer, &args, now),
        Command::Show(args) => cmd_show(store, cfg, renderer, &args, now),
        Command::Config => cmd_config(cfg),
    }
}

#[instrument(skip(store, cfg, args))]
fn cmd_fetch(store: &DataStore, cfg: &Config, args: &FetchArgs) -> anyhow::Result<()> {
    let view = resolve_view(cfg, args.view)?;
    info!(%view, "command fetch");

    let response = fetch_and_store(store, cfg, view)?;
    println!(
        "Stored {} task(s) for {view} ({} reported by backend).",
        response.tasks.len(),
        response.total_count
    );
    Ok(())
}

#[instrument(skip(store, cfg, renderer, args, now))]
fn cmd_jobs(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &JobsArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let view = resolve_view(cfg, args.source.view)?;
    info!(%view, "command jobs");

    let spec = args.to_filter_spec(view, now)?;
    let mut board = load_board(store, cfg, &args.source, view)?;
    board.set_filter(spec);

    let visible = board.visible();
    debug!(
        roots = board.forest().len(),
        visible = visible.len(),
        "filtered jobs"
    );

    if args.json {
        let text = serde_json::to_string_pretty(&visible).context("failed to encode jobs")?;
        println!("{text}");
        return Ok(());
    }

    if visible.is_empty() {
        if board.forest().is_empty() {
            println!("No jobs in {view}.");
        } else {
            println!("No jobs match the current filter.");
        }
        return Ok(());
    }

    renderer.print_forest(&visible, args.flat, now)?;
    println!();
    println!(
        "{} of {} job(s) shown; backend reports {} task(s).",
        visible.len(),
        board.forest().len(),
        board.total_count()
    );
    Ok(())
}

#[instrument(skip(store, cfg, renderer, args, now))]
fn cmd_show(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &ShowArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let view = resolve_view(cfg, args.source.view)?;
    info!(%view, id = %args.id, "command show");

    let board = load_board(store, cfg, &args.source, view)?;
    let id = TaskId::new(args.id.trim());
    let node = find(board.forest(), &id)
        .ok_or_else(|| anyhow!("no task with id {id} in {view}"))?;

    renderer.print_task_detail(node, now)?;
    if !node.subtasks.is_empty() {
        println!();
        renderer.print_forest(std::slice::from_ref(node), false, now)?;
    }
    Ok(())
}

#[instrument(skip(cfg))]
fn cmd_config(cfg: &Config) -> anyhow::Result<()> {
    info!("command config");

    for file in &cfg.loaded_files {
        println!("# loaded {}", file.display());
    }

    let sorted: BTreeMap<&String, &String> = cfg.iter().collect();
    for (key, value) in sorted {
        if SECRET_KEYS.contains(&key.as_str()) {
            println!("{key}=********");
        } else {
            println!("{key}={value}");
        }
    }
    Ok(())
}

fn resolve_view(cfg: &Config, explicit: Option<View>) -> anyhow::Result<View> {
    match explicit {
        Some(view) => Ok(view),
        None => cfg.default_view(),
    }
}

/// Runs one fetch through a [`JobBoard`] so the result is built into a tree
/// with the configured parent resolution.
fn load_board(
    store: &DataStore,
    cfg: &Config,
    source: &SourceArgs,
    view: View,
) -> anyhow::Result<JobBoard> {
    let mut board = JobBoard::new(view).with_tree_options(cfg.tree_options());
    let ticket = board.begin_fetch();
    let response = load_response(store, cfg, source, view)?;
    if !board.apply(ticket, response) {
        return Err(anyhow!("task list for {view} was superseded"));
    }
    Ok(board)
}

#[instrument(skip(store, cfg, source))]
fn load_response(
    store: &DataStore,
    cfg: &Config,
    source: &SourceArgs,
    view: View,
) -> anyhow::Result<NormalizedResponse> {
    if let Some(path) = &source.input {
        debug!(file = %path.display(), "reading task list from file");
        return store.import_response(path);
    }

    if !source.refresh {
        if let Some(snapshot) = store.load_snapshot(view)? {
            return Ok(snapshot);
        }
        info!(%view, "no snapshot yet; fetching from backend");
    }

    fetch_and_store(store, cfg, view)
}

fn fetch_and_store(
    store: &DataStore,
    cfg: &Config,
    view: View,
) -> anyhow::Result<NormalizedResponse> {
    let client = ApiClient::from_config(cfg)?;
    let response = block_on(client.fetch_my_tasks(view))
        .with_context(|| format!("failed to fetch {view} tasks"))?;

    if let Err(err) = store.save_snapshot(view, &response) {
        warn!(error = %format!("{err:#}"), "fetched tasks but could not store snapshot");
    }
    Ok(response)
}

/// Drives one fallible future to completion on a current-thread runtime.
fn block_on<T, F>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(future)
}
