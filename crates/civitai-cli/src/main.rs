//! Civitai CLI - search the catalog, download models and keep a local
//! library's metadata in step.

mod display;
mod presenter;

use anyhow::{bail, Context, Result};
use civitai_core::catalog::{NsfwFilter, Period, SearchParams, SortOrder};
use civitai_core::download::{jobs_for_versions, select_versions, BackgroundDownloader};
use civitai_core::network::DownloadProgress;
use civitai_core::settings::{ImageFilter, ImageSize};
use civitai_core::{IndexBackend, ModelType, Session};
use clap::{Args as ClapArgs, Parser, Subcommand};
use presenter::TerminalPresenter;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code after a second interrupt.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "civitai")]
#[command(about = "Download and manage Civitai models")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Library root for this run (overrides the saved setting)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Keep the index in SQLite instead of JSON
    #[arg(long, global = true)]
    sqlite_index: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the catalog
    Search(SearchArgs),
    /// Show a model and its versions
    Model { model_id: u64 },
    /// Show one model version
    Version { version_id: u64 },
    /// Identify a file by its SHA-256
    Hash { sha256: String },
    /// Download versions of a model
    Download {
        model_id: u64,
        /// Version ids to fetch; prompts when omitted
        #[arg(long = "version")]
        versions: Vec<u64>,
        /// Run the jobs on the background worker
        #[arg(long)]
        background: bool,
    },
    /// Rebuild the index from the library on disk
    Scan {
        /// Model types to scan; defaults to all scannable types
        #[arg(long = "type", value_parser = parse_model_type)]
        types: Vec<ModelType>,
        /// Also fetch missing companion metadata from the catalog
        #[arg(long)]
        resolve: bool,
    },
    /// Retry downloads that did not finish
    Resume,
    /// List downloads waiting for a retry
    Pending {
        /// Forget every pending download
        #[arg(long)]
        clear: bool,
    },
    /// Show or change saved settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(ClapArgs, Debug)]
struct SearchArgs {
    /// Free-text query
    query: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long = "type", value_parser = parse_model_type)]
    types: Vec<ModelType>,
    /// Highest-rated, most-downloaded or newest
    #[arg(long)]
    sort: Option<SortOrder>,
    #[arg(long)]
    period: Option<Period>,
    /// all, sfw or nsfw
    #[arg(long)]
    nsfw: Option<NsfwFilter>,
    #[arg(long)]
    base_model: Option<String>,
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    limit: Option<u32>,
    /// Show the first preview image of each result
    #[arg(long)]
    previews: bool,
}

impl SearchArgs {
    fn to_params(&self) -> SearchParams {
        SearchParams {
            query: self.query.clone(),
            tag: self.tag.clone(),
            username: self.username.clone(),
            types: self.types.clone(),
            sort: self.sort,
            period: self.period,
            nsfw: self.nsfw.unwrap_or_default(),
            base_model: self.base_model.clone(),
            page: self.page,
            cursor: None,
            limit: self.limit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Print the current settings
    Show,
    /// Set the library root directory
    SetRoot { path: PathBuf },
    /// Save search filters applied to every search
    SetQuery(SearchArgs),
    /// block-nsfw, blockify or allow-all
    SetImageFilter { filter: ImageFilter },
    /// small, medium or large
    SetImageSize { size: ImageSize },
    /// Turn image previews off or on
    TextOnly {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

fn parse_model_type(s: &str) -> std::result::Result<ModelType, String> {
    Ok(ModelType::parse(s))
}

fn init_logging(args: &Args) {
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    if args.json_logs {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// First Ctrl-C cancels in-flight work, a second one exits.
fn spawn_interrupt_watcher(session: &Session) -> JoinHandle<()> {
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, finishing up. Press Ctrl-C again to exit now");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    })
}

/// Render progress updates on one stderr line until the sender closes.
fn spawn_progress_printer(mut rx: mpsc::Receiver<DownloadProgress>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut printed = false;
        while let Some(progress) = rx.recv().await {
            let mb = progress.bytes_downloaded as f64 / 1_000_000.0;
            let speed = progress.speed_bytes_per_sec / 1_000_000.0;
            let line = match progress.percent {
                Some(percent) => format!("  {:5.1}%  {:.1} MB  {:.1} MB/s", percent, mb, speed),
                None => format!("  {:.1} MB  {:.1} MB/s", mb, speed),
            };
            eprint!("\r{:<48}", line);
            let _ = std::io::stderr().flush();
            printed = true;
        }
        if printed {
            eprintln!();
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let mut session = Session::open_default().context("Failed to open session")?;
    // A one-off root must not leak into saved settings.
    if let Some(ref root) = args.root {
        if !matches!(args.command, Command::Settings(_)) {
            session = session.with_root(root.clone());
        }
    }
    if args.sqlite_index {
        session = session.with_index_backend(IndexBackend::Sqlite);
    }
    info!("Library root: {}", session.layout().root().display());

    let watcher = spawn_interrupt_watcher(&session);
    let result = run(args.command, &mut session).await;
    watcher.abort();
    result
}

async fn run(command: Command, session: &mut Session) -> Result<()> {
    let presenter = TerminalPresenter::new(session.settings().image_size);

    match command {
        Command::Search(search) => {
            let page = session.search(&search.to_params()).await?;
            if page.items.is_empty() {
                println!("No models found");
                return Ok(());
            }
            for model in &page.items {
                println!("{}\n", display::model_card(model));
                if search.previews {
                    session.show_preview(model, &presenter).await?;
                }
            }
            println!("{}", display::page_footer(&page));
        }

        Command::Model { model_id } => {
            let model = session.catalog().get_model_by_id(model_id).await?;
            let index = session.open_index()?;
            println!("{}\n", display::model_card(&model));
            session.show_preview(&model, &presenter).await?;
            println!("Versions:");
            println!(
                "{}",
                display::version_list(&model, &index.find_by_remote_model_id(model_id))
            );
        }

        Command::Version { version_id } => {
            let version = session.catalog().get_version_by_id(version_id).await?;
            println!("{}", display::version_details(&version));
        }

        Command::Hash { sha256 } => {
            match session.reconciler().resolve_by_hash(&sha256).await? {
                Some(version) => println!("{}", display::version_details(&version)),
                None => println!("No catalog entry has a file with hash {}", sha256),
            }
        }

        Command::Download {
            model_id,
            versions,
            background,
        } => download(session, &presenter, model_id, &versions, background).await?,

        Command::Scan { types, resolve } => {
            let types = if types.is_empty() {
                ModelType::scannable()
            } else {
                types
            };
            let mut index = session.open_index()?;

            let summary = session.scanner().scan(&mut index, Some(&types))?;
            println!("{}", display::scan_summary(&summary));
            println!(
                "{} new files, {} hashed, {} stale entries pruned",
                summary.discovered_new,
                summary.total_hashed(),
                summary.total_pruned()
            );

            if resolve {
                let report = session.reconciler().reconcile(&mut index, Some(&types)).await?;
                for entry in &report.directories {
                    println!("{}", display::reconcile_entry(entry));
                }
            }
        }

        Command::Resume => {
            let pending = session.pending();
            if pending.is_empty() {
                println!("No pending downloads");
                return Ok(());
            }
            let mut index = session.open_index()?;
            let (tx, rx) = mpsc::channel(32);
            let printer = spawn_progress_printer(rx);
            let orchestrator = session.orchestrator().with_progress(tx);
            orchestrator.discard_stale_staging();

            let reports = pending.resume(&orchestrator, &mut index).await?;
            drop(orchestrator);
            let _ = printer.await;
            for report in &reports {
                println!("{}", display::job_report(report));
            }
        }

        Command::Pending { clear } => {
            let pending = session.pending();
            if clear {
                pending.clear()?;
                println!("Cleared pending downloads");
                return Ok(());
            }
            let entries = pending.load_all();
            if entries.is_empty() {
                println!("No pending downloads");
            }
            for entry in &entries {
                println!("{}", display::pending_entry(entry));
            }
        }

        Command::Settings(command) => settings(session, command)?,
    }

    Ok(())
}

async fn download(
    session: &Session,
    presenter: &TerminalPresenter,
    model_id: u64,
    versions: &[u64],
    background: bool,
) -> Result<()> {
    let model = session.catalog().get_model_by_id(model_id).await?;
    let mut index = session.open_index()?;

    println!("{}\n", display::model_card(&model));
    session.show_preview(&model, presenter).await?;

    let jobs = if versions.is_empty() {
        select_versions(&model, presenter, &index)
    } else {
        jobs_for_versions(&model, versions)
    };
    if jobs.is_empty() {
        println!("Nothing to download");
        return Ok(());
    }

    let (tx, rx) = mpsc::channel(32);
    let printer = spawn_progress_printer(rx);
    let orchestrator = session.orchestrator().with_progress(tx);
    orchestrator.discard_stale_staging();

    let reports = if background {
        let worker = BackgroundDownloader::spawn(orchestrator, index);
        for job in jobs {
            worker.enqueue(job).await?;
        }
        info!("Downloads queued, waiting for the worker to finish");
        worker.shutdown().await?
    } else {
        let reports = orchestrator.run_batch(&mut index, &jobs).await;
        drop(orchestrator);
        reports
    };
    let _ = printer.await;

    for report in &reports {
        println!("{}", display::job_report(report));
    }
    if reports.iter().any(|r| !r.succeeded()) {
        bail!("Some downloads did not finish; run `civitai resume` to retry them");
    }
    Ok(())
}

fn settings(session: &mut Session, command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            println!("{}", serde_json::to_string_pretty(session.settings())?);
            println!("Stored at {}", session.settings_path().display());
            return Ok(());
        }
        SettingsCommand::SetRoot { path } => {
            if !path.is_dir() {
                bail!("{} is not a directory", path.display());
            }
            session.settings_mut().root_directory = path;
        }
        SettingsCommand::SetQuery(search) => {
            let params = search.to_params();
            params.validate()?;
            session.settings_mut().default_query = params;
        }
        SettingsCommand::SetImageFilter { filter } => {
            session.settings_mut().image_filter = filter;
        }
        SettingsCommand::SetImageSize { size } => {
            session.settings_mut().image_size = size;
        }
        SettingsCommand::TextOnly { enabled } => {
            session.settings_mut().text_only = enabled;
        }
    }
    session.save_settings()?;
    println!("Settings saved");
    Ok(())
}
