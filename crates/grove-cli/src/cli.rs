//! CLI definition and command dispatch for grove.
//!
//! ## Configuration Precedence
//!
//! Configuration is resolved with the following precedence (highest to lowest):
//! 1. CLI flags (e.g., `--store`, `--port`, `--batch-size`)
//! 2. Environment variables (`GROVE_CONFIG`, `GROVE_STORE`, `GROVE_VERBOSE`)
//! 3. Config file (`~/.grove/config.yaml` or path from `--config`/`GROVE_CONFIG`)
//! 4. Built-in defaults

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grove_core::{
    collect_sources, execute_load_plan, export_pages, plan_load, write_pages, ExportOptions,
    GroveConfig, GroveEngine, GroveError, LoadOptions, OutlineParser, Query, QueryResult, Status,
};
use grove_db::StoreConfig;
use grove_rpc::Server;
use tracing::debug;

use crate::ui::format::{format_relative_time, outline_lines, truncate_str};
use crate::ui::{ColorMode, MessageType, Progress, ProgressMode, StepTree, Style};

/// Width used when printing block content in trees.
const CONTENT_WIDTH: usize = 100;

// ============================================================================
// CLI Definition
// ============================================================================

/// grove – local outliner knowledge graph
#[derive(Parser, Debug)]
#[command(name = "grove")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "GROVE_VERBOSE")]
    pub verbose: bool,

    /// Suppress progress and informational messages
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file (default: ~/.grove/config.yaml)
    #[arg(long, global = true, env = "GROVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory of a durable store; overrides `store` in the config file
    #[arg(long, global = true, env = "GROVE_STORE")]
    pub store: Option<PathBuf>,

    /// Color output mode
    #[arg(long, global = true, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the sidecar store on a loopback port
    #[command(after_help = r#"EXAMPLES:
    # Serve the graph in ./graph-store on the configured port
    grove --store ./graph-store serve

    # Pick a port explicitly
    grove serve --port 9000
"#)]
    Serve {
        /// Port to bind on 127.0.0.1 (default from config: 7878)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load every outline file under a directory
    #[command(after_help = r#"EXAMPLES:
    # Load a folder of notes
    grove --store ./graph-store load ~/notes

    # Smaller commit chunks, report as JSON
    grove load ~/notes --batch-size 20 --json
"#)]
    Load {
        /// Directory to scan for .md files
        dir: PathBuf,

        /// Files per commit chunk (default from config: 100)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Parse files on one thread
        #[arg(long)]
        sequential: bool,

        /// Output the load report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a page's block tree
    Tree {
        /// Page title (matched case-insensitively)
        title: String,

        /// Output the tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write every page as an outline file
    Export {
        /// Output directory (created if missing)
        dir: PathBuf,

        /// Write id:: lines so a reload keeps identities
        #[arg(long)]
        ids: bool,
    },

    /// List pages
    Pages {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse arguments, run the command and map the outcome to an exit code.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    let filter = format!(
        "grove_core={0},grove_db={0},grove_rpc={0},grove_cli={0}",
        log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let style = Style::new(cli.color);

    match dispatch(&cli, &style) {
        Ok(code) => code,
        Err(e) => {
            let hint = e.chain().find_map(|cause| match cause.downcast_ref::<GroveError>() {
                Some(GroveError::InvalidConfiguration { hint, .. }) => Some(hint.clone()),
                Some(GroveError::InvalidConfig { path, .. }) => {
                    Some(format!("Check your config at {}", path))
                }
                _ => None,
            });
            let cause = e.chain().nth(1).map(|c| c.to_string());
            eprintln!(
                "{}",
                style.error_with_context(&e.to_string(), cause.as_deref(), hint.as_deref())
            );
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<GroveConfig> {
    let mut config = match &cli.config {
        Some(path) => GroveConfig::from_path(path)?,
        None => GroveConfig::load_default()?,
    };
    if let Some(store) = &cli.store {
        config.store = StoreConfig::file(store);
    }
    config.validate()?;
    Ok(config)
}

fn dispatch(cli: &Cli, style: &Style) -> Result<ExitCode> {
    let config = load_config(cli).context("Failed to load configuration")?;
    debug!("Resolved config: {:?}", config);

    if let Command::Serve { port } = &cli.command {
        let port = port.unwrap_or(config.rpc.port);
        let engine = GroveEngine::open(config).context("Failed to open store")?;
        handle_serve(style, engine, port)?;
        return Ok(ExitCode::SUCCESS);
    }

    let engine = GroveEngine::open(config.clone()).context("Failed to open store")?;
    let code = match &cli.command {
        Command::Load {
            dir,
            batch_size,
            sequential,
            json,
        } => {
            let mut opts = LoadOptions::from_config(&config.ingest);
            if let Some(size) = batch_size {
                opts.batch_size = *size;
            }
            if *sequential {
                opts.parallel = false;
            }
            let mode = ProgressMode::detect(cli.quiet, *json);
            handle_load(style, &engine, dir, &opts, mode, *json)?
        }
        Command::Tree { title, json } => handle_tree(style, &engine, title, *json)?,
        Command::Export { dir, ids } => {
            let mode = ProgressMode::detect(cli.quiet, false);
            handle_export(style, &engine, dir, *ids, mode)?
        }
        Command::Pages { json } => handle_pages(style, &engine, *json)?,
        Command::Serve { .. } => ExitCode::SUCCESS,
    };
    engine.flush()?;
    Ok(code)
}

// ============================================================================
// Command handlers
// ============================================================================

fn handle_serve(style: &Style, engine: GroveEngine, port: u16) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let engine = Arc::new(engine);
    runtime.block_on(async {
        let listener = Server::bind(port)
            .await
            .with_context(|| format!("Failed to bind port {}", port))?;
        let addr = listener.local_addr()?;
        println!(
            "{}",
            style.message(MessageType::Ok, &format!("Serving grove on {}", addr))
        );
        let server = Server::new(Arc::clone(&engine), Arc::new(OutlineParser));
        tokio::select! {
            result = server.serve(listener) => result?,
            _ = tokio::signal::ctrl_c() => {
                println!("{}", style.message(MessageType::Info, "Shutting down"));
            }
        }
        anyhow::Ok(())
    })?;
    engine.flush()?;
    Ok(())
}

fn handle_load(
    style: &Style,
    engine: &GroveEngine,
    dir: &std::path::Path,
    opts: &LoadOptions,
    mode: ProgressMode,
    json: bool,
) -> Result<ExitCode> {
    let mut steps = StepTree::new(mode);

    steps.step("Collecting sources");
    let sources = collect_sources(dir)?;

    steps.step("Parsing and validating");
    let plan = plan_load(&engine.snapshot()?, &OutlineParser, &sources, opts);

    steps.step("Committing");
    let bar = Progress::bar(plan.files.len() as u64, "files", mode);
    let report = execute_load_plan(engine, plan, |done| {
        bar.set_position(done as u64);
        bar.set_message(&format!("{} files committed", done));
    })?;
    bar.finish_clear();
    steps.finish_last_step();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if mode.prints_summary() {
        for outcome in &report.parse_errors {
            let detail = outcome.detail.as_deref().unwrap_or("parse error");
            println!(
                "{}",
                style.message(
                    MessageType::Warn,
                    &format!("Skipped {}: {}", style.file_path(&outcome.file_path), detail)
                )
            );
        }
        for conflict in &report.conflicts {
            println!("{}", style.message(MessageType::Err, &conflict.to_string()));
        }
        if let Some(failure) = &report.failure {
            println!(
                "{}",
                style.error_with_context(
                    &format!("Chunk {} failed ({})", failure.index, failure.kind),
                    Some(&failure.message),
                    Some("Earlier chunks stay committed; fix the cause and load again"),
                )
            );
        }
        let summary = format!(
            "Loaded {}/{} files from {}",
            report.committed,
            sources.len(),
            style.file_path(&dir.display().to_string())
        );
        let msg_type = if report.status == Status::Ok {
            MessageType::Ok
        } else {
            MessageType::Err
        };
        println!("{}", style.message(msg_type, &summary));
        println!(
            "{}",
            style.message_detail(
                "Chunks",
                &format!("{}/{}", report.chunks_committed, report.chunks)
            )
        );
        if !report.conflicts.is_empty() {
            println!(
                "{}",
                style.message(
                    MessageType::Hint,
                    "Nothing was committed; give each id and page title a single home"
                )
            );
        }
    }

    Ok(if report.status == Status::Ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn handle_tree(style: &Style, engine: &GroveEngine, title: &str, json: bool) -> Result<ExitCode> {
    let page = engine
        .page_by_title(title)?
        .ok_or_else(|| GroveError::not_found("page", title))?;
    let tree = engine
        .get_page_tree(page.id)?
        .ok_or_else(|| GroveError::not_found("page", page.id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", style.page_title(&tree.page.title));
    if let Some(file) = &tree.page.file {
        println!("{}", style.message_detail("File", &style.file_path(file)));
    }
    println!(
        "{}",
        style.message_detail("Blocks", &tree.block_count().to_string())
    );
    println!();
    for line in outline_lines(&tree, CONTENT_WIDTH) {
        println!("{}", line);
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_export(
    style: &Style,
    engine: &GroveEngine,
    dir: &std::path::Path,
    include_ids: bool,
    mode: ProgressMode,
) -> Result<ExitCode> {
    let spinner = Progress::spinner("Exporting pages", mode);
    let ids: Vec<uuid::Uuid> = match engine.query(&Query::AllPages)? {
        QueryResult::Pages(pages) => pages.into_iter().map(|p| p.id).collect(),
        _ => Vec::new(),
    };
    let trees = engine.get_pages_for_file_sync(&ids)?;
    let files = export_pages(&trees, &ExportOptions { include_ids });
    let written = write_pages(dir, &files)?;
    spinner.finish_with_message(&style.message(
        MessageType::Ok,
        &format!(
            "Exported {} pages to {}",
            written,
            style.file_path(&dir.display().to_string())
        ),
    ));
    Ok(ExitCode::SUCCESS)
}

fn handle_pages(style: &Style, engine: &GroveEngine, json: bool) -> Result<ExitCode> {
    let pages = match engine.query(&Query::AllPages)? {
        QueryResult::Pages(pages) => pages,
        _ => Vec::new(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&pages)?);
        return Ok(ExitCode::SUCCESS);
    }

    if pages.is_empty() {
        println!("{}", style.message(MessageType::Info, "No pages"));
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", style.section(&format!("PAGES ({})", pages.len())));
    for page in &pages {
        let mut line = format!(
            "  {}  {}",
            style.short_id(&page.id),
            style.page_title(&truncate_str(&page.title, 60))
        );
        if let Some(file) = &page.file {
            line.push_str(&format!("  {}", style.file_path(file)));
        }
        if let Some(updated) = page.updated_at {
            line.push_str(&format!("  ({})", format_relative_time(updated)));
        }
        println!("{}", line);
    }
    Ok(ExitCode::SUCCESS)
}
