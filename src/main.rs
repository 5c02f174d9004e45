use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use lanmap::config::{load_config, Config};
use lanmap::import::{add_host, get_file_content, host_tree, import_payload, list_hosts};
use lanmap::model::{Compression, HostInfo};
use lanmap::pack::{generate_context_pack, ContextPackRequest};
use lanmap::payload::encode_payload;
use lanmap::scanner::{build_payload, ScanOptions};
use lanmap::server::{run_stdio_server, ServerState};
use lanmap::store::{NodeStore, SnapshotStore};
use rayon::prelude::*;
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[derive(Debug, Parser)]
#[command(name = "lanmap")]
#[command(version)]
#[command(about = "Import LAN host scan payloads and build size-bounded context packs")]
struct Cli {
    /// Config file (default: ./.lanmap.json when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Node store snapshot (overrides config and LANMAP_STORE)
    #[arg(long, global = true, value_name = "FILE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import one or more payload files (`-` reads stdin). Files are imported in parallel.
    Import {
        #[arg(required = true, value_name = "FILE|-")]
        files: Vec<PathBuf>,
    },
    /// List hosts, most recently updated first
    Hosts,
    /// Register a host without importing
    AddHost {
        #[arg(long)]
        label: String,
        #[arg(long)]
        address: String,
    },
    /// Print a host's file tree as JSON
    Tree { host_id: String },
    /// Generate a context pack for a host
    Pack {
        host_id: String,
        /// compact | full
        #[arg(long)]
        snippet_mode: Option<String>,
        /// small | medium | large
        #[arg(long)]
        chunk_preset: Option<String>,
        /// Write each part to <DIR>/<host>-part-NNN.md instead of stdout
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
    },
    /// Print a file node's metadata and content as JSON
    File { node_id: String },
    /// Scan a local directory and emit a LANMAP1 payload
    Scan {
        dir: PathBuf,
        #[arg(long)]
        label: String,
        #[arg(long)]
        address: String,
        /// gzip | deflate
        #[arg(long, default_value = "gzip")]
        compression: Compression,
        /// Write the payload here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Start the MCP stdio server
    Mcp,
}

fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner} {msg}")?.tick_strings(SPINNER_TICKS));
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn open_store(cfg: &Config) -> Result<Arc<dyn NodeStore>> {
    let store = SnapshotStore::open(&cfg.store_path)
        .with_context(|| format!("Failed to open store: {}", cfg.store_path.display()))?;
    Ok(Arc::new(store))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_payload(source: &Path) -> Result<String> {
    if source.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).with_context(|| format!("Failed to read payload: {}", source.display()))
}

fn run_import(store: &dyn NodeStore, cfg: &Config, files: &[PathBuf]) -> Result<()> {
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")?);
    pb.set_message("importing");

    let outcomes: Vec<(String, Result<lanmap::import::ImportResult>)> = files
        .par_iter()
        .map(|file| {
            let outcome = read_payload(file)
                .and_then(|payload| import_payload(store, &payload, &cfg.payload).map_err(anyhow::Error::from));
            pb.inc(1);
            (file.display().to_string(), outcome)
        })
        .collect();
    pb.finish_and_clear();

    let mut failed = 0usize;
    let report: Vec<serde_json::Value> = outcomes
        .into_iter()
        .map(|(source, outcome)| match outcome {
            Ok(result) => json!({ "source": source, "result": result }),
            Err(e) => {
                failed += 1;
                let kind = e.downcast_ref::<lanmap::error::Error>().map(|e| e.kind()).unwrap_or("io");
                json!({ "source": source, "error": { "kind": kind, "message": format!("{e:#}") } })
            }
        })
        .collect();
    print_json(&report)?;

    if failed > 0 {
        anyhow::bail!("{failed} of {} imports failed", files.len());
    }
    Ok(())
}

fn run_pack(
    store: &dyn NodeStore,
    cfg: &Config,
    host_id: &str,
    snippet_mode: Option<&str>,
    chunk_preset: Option<&str>,
    out_dir: Option<&Path>,
) -> Result<()> {
    let request = ContextPackRequest::parse(host_id, snippet_mode, chunk_preset)?;
    let pack = generate_context_pack(store, &request, &cfg.pack)?;

    let Some(out_dir) = out_dir else {
        for part in &pack.parts {
            print!("{}", part.content);
            if part.index < part.total {
                println!();
            }
        }
        return Ok(());
    };

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output dir: {}", out_dir.display()))?;
    let mut written = Vec::with_capacity(pack.parts.len());
    for part in &pack.parts {
        let path = out_dir.join(format!("{}-part-{:03}.md", pack.summary.host_id, part.index));
        std::fs::write(&path, &part.content).with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(json!({ "path": path.display().to_string(), "stats": part.stats }));
    }
    print_json(&json!({ "summary": pack.summary, "parts": written }))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep stdout clean for JSON-RPC.
    init_tracing(if matches!(cli.cmd, Command::Mcp) { "warn" } else { "info" });

    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let mut cfg = load_config(&cwd, cli.config.as_deref())?;
    if let Some(store) = cli.store {
        cfg.store_path = store;
    }

    match cli.cmd {
        Command::Mcp => {
            let store = open_store(&cfg)?;
            run_stdio_server(ServerState::new(store, cfg))
        }
        Command::Import { files } => {
            let store = open_store(&cfg)?;
            run_import(store.as_ref(), &cfg, &files)
        }
        Command::Hosts => print_json(&list_hosts(open_store(&cfg)?.as_ref())?),
        Command::AddHost { label, address } => print_json(&add_host(open_store(&cfg)?.as_ref(), &label, &address)?),
        Command::Tree { host_id } => print_json(&host_tree(open_store(&cfg)?.as_ref(), &host_id)?),
        Command::File { node_id } => print_json(&get_file_content(open_store(&cfg)?.as_ref(), &node_id)?),
        Command::Pack {
            host_id,
            snippet_mode,
            chunk_preset,
            out_dir,
        } => {
            let store = open_store(&cfg)?;
            run_pack(
                store.as_ref(),
                &cfg,
                &host_id,
                snippet_mode.as_deref(),
                chunk_preset.as_deref(),
                out_dir.as_deref(),
            )
        }
        Command::Scan {
            dir,
            label,
            address,
            compression,
            out,
        } => {
            let opts = ScanOptions::from_config(&dir, &cfg.scan);
            let pb = spinner("scanning files...")?;
            let data = build_payload(&opts, HostInfo { label, address })?;
            pb.finish_with_message(format!("scanned {} entries", data.entries.len()));

            let wire = encode_payload(&data, compression).context("Failed to encode payload")?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &wire).with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Wrote {} bytes to {}", wire.len(), path.display());
                }
                None => println!("{wire}"),
            }
            Ok(())
        }
    }
}
