//! wharf - asynchronous file operations over pluggable URL backends.
//!
//! Usage:
//!   wharf cp SRC... DEST     Copy files or directory trees
//!   wharf mv SRC... DEST     Move files or directory trees
//!   wharf ln SRC... DEST     Symlink sources into a destination
//!   wharf rm TARGET...       Delete recursively
//!   wharf ls URL             List a directory
//!   wharf stat URL           Show one resource's metadata
//!   wharf mkdir URL          Create a directory

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;
use humansize::{format_size, BINARY};

use wharf_core::{
    AutoInteract, EngineConfig, EntryRecord, LocalCapabilities, Notifier, OpError, ResourceUrl,
};
use wharf_local::LocalDispatch;
use wharf_ops::{CopySummary, Engine, ListOptions, ListUpdate, OpHandle};

#[derive(Parser)]
#[command(
    name = "wharf",
    version,
    about = "Asynchronous file operations with conflict handling and resumable transfers"
)]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Show live progress on stderr
    #[arg(short = 'P', long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConflictArgs {
    /// Overwrite existing destinations without asking
    #[arg(short = 'f', long, conflicts_with = "skip")]
    overwrite: bool,

    /// Skip conflicting destinations instead of failing
    #[arg(short = 's', long)]
    skip: bool,
}

impl ConflictArgs {
    fn interact(&self) -> AutoInteract {
        if self.overwrite {
            AutoInteract::overwriting()
        } else if self.skip {
            AutoInteract::skipping()
        } else {
            AutoInteract::cancelling()
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Copy files or directory trees
    Cp {
        /// Sources followed by the destination
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,

        #[command(flatten)]
        conflicts: ConflictArgs,
    },

    /// Move files or directory trees
    Mv {
        /// Sources followed by the destination
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,

        #[command(flatten)]
        conflicts: ConflictArgs,
    },

    /// Symlink sources into a destination
    Ln {
        /// Sources followed by the destination
        #[arg(required = true, num_args = 2..)]
        paths: Vec<String>,

        #[command(flatten)]
        conflicts: ConflictArgs,
    },

    /// Delete files and directory trees
    Rm {
        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// List a directory
    Ls {
        #[arg(default_value = ".")]
        url: String,

        /// Descend into subdirectories
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Include hidden entries
        #[arg(short = 'a', long)]
        all: bool,
    },

    /// Show one resource's metadata
    Stat { url: String },

    /// Create a directory
    Mkdir { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Cp { paths, conflicts } => {
            let (sources, dest) = split_paths(paths)?;
            let engine = engine(conflicts.interact());
            let summary = drive(engine.copy(sources, dest), cli.progress).await?;
            report_transfer("copied", &summary, cli.json)
        }
        Command::Mv { paths, conflicts } => {
            let (sources, dest) = split_paths(paths)?;
            let engine = engine(conflicts.interact());
            let summary = drive(engine.move_to(sources, dest), cli.progress).await?;
            report_transfer("moved", &summary, cli.json)
        }
        Command::Ln { paths, conflicts } => {
            let (sources, dest) = split_paths(paths)?;
            let engine = engine(conflicts.interact());
            let summary = drive(engine.link(sources, dest), cli.progress).await?;
            report_transfer("linked", &summary, cli.json)
        }
        Command::Rm { targets } => {
            let targets = targets
                .iter()
                .map(|t| parse_url(t))
                .collect::<Result<Vec<_>>>()?;
            let engine = engine(AutoInteract::cancelling());
            let summary = drive(engine.delete(targets), cli.progress).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "removed {} files, {} symlinks, {} directories",
                    summary.files, summary.symlinks, summary.dirs
                );
            }
            Ok(())
        }
        Command::Ls {
            url,
            recursive,
            all,
        } => run_ls(&url, recursive, all, cli.json).await,
        Command::Stat { url } => {
            let engine = engine(AutoInteract::cancelling());
            let entry = drive(engine.stat(parse_url(&url)?), false).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                print_stat(&entry);
            }
            Ok(())
        }
        Command::Mkdir { url } => {
            let engine = engine(AutoInteract::cancelling());
            drive(engine.mkdir(parse_url(&url)?, -1), false).await?;
            Ok(())
        }
    }
}

fn engine(interact: AutoInteract) -> Arc<Engine> {
    Engine::new(
        Arc::new(LocalDispatch::new()),
        Arc::new(LocalCapabilities),
        Arc::new(interact),
        Arc::new(Notifier::new()),
        EngineConfig::default(),
    )
}

fn parse_url(input: &str) -> Result<ResourceUrl> {
    Ok(ResourceUrl::parse(input)?)
}

/// Split "SRC... DEST" argument lists.
fn split_paths(mut paths: Vec<String>) -> Result<(Vec<ResourceUrl>, ResourceUrl)> {
    let dest = parse_url(&paths.pop().expect("clap enforces at least two paths"))?;
    let sources = paths
        .iter()
        .map(|p| parse_url(p))
        .collect::<Result<Vec<_>>>()?;
    Ok((sources, dest))
}

/// Wait for an operation, optionally echoing progress to stderr.
async fn drive<T>(mut handle: OpHandle<T>, progress: bool) -> Result<T, OpError> {
    if progress {
        while let Some(p) = handle.next_progress().await {
            eprint!(
                "\r{} {:>5.1}% ({} / {})  ",
                p.kind,
                p.percentage(),
                format_size(p.processed_bytes, BINARY),
                format_size(p.total_bytes, BINARY),
            );
        }
        eprintln!();
    }
    handle.wait().await
}

fn report_transfer(verb: &str, summary: &CopySummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    let mut line = format!(
        "{verb} {} files, {} directories ({})",
        summary.files + summary.renamed,
        summary.dirs,
        format_size(summary.bytes, BINARY),
    );
    if summary.symlinks > 0 {
        line.push_str(&format!(", {} symlinks", summary.symlinks));
    }
    if summary.skipped > 0 {
        line.push_str(&format!(", {} skipped", summary.skipped));
    }
    println!("{line}");
    Ok(())
}

async fn run_ls(url: &str, recursive: bool, all: bool, json: bool) -> Result<()> {
    let engine = engine(AutoInteract::cancelling());
    let opts = ListOptions {
        recursive,
        include_hidden: all,
    };
    let (handle, mut updates) = engine.list_dir(parse_url(url)?, opts);
    let mut collected: Vec<EntryRecord> = Vec::new();
    while let Some(update) = updates.recv().await {
        match update {
            ListUpdate::Entries(batch) => {
                if json {
                    collected.extend(batch);
                } else {
                    for entry in &batch {
                        print_entry(entry);
                    }
                }
            }
            ListUpdate::Redirect(target) => eprintln!("redirected to {target}"),
        }
    }
    handle.wait().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&collected)?);
    }
    Ok(())
}

fn print_entry(entry: &EntryRecord) {
    let type_char = if entry.is_dir() {
        'd'
    } else if entry.is_link() {
        'l'
    } else {
        '-'
    };
    let perms = entry
        .permissions()
        .map(|p| format!("{p:04o}"))
        .unwrap_or_else(|| "????".to_string());
    let size = if entry.is_dir() {
        "-".to_string()
    } else {
        format_size(entry.size().max(0) as u64, BINARY)
    };
    match entry.link_target() {
        Some(target) => println!("{type_char}{perms} {size:>10}  {} -> {target}", entry.name()),
        None => println!("{type_char}{perms} {size:>10}  {}", entry.name()),
    }
}

fn print_stat(entry: &EntryRecord) {
    let kind = if entry.is_dir() {
        "directory"
    } else if entry.is_link() {
        "symlink"
    } else {
        "file"
    };
    println!("name:        {}", entry.name());
    println!("type:        {kind}");
    if !entry.is_dir() {
        println!(
            "size:        {} ({} bytes)",
            format_size(entry.size().max(0) as u64, BINARY),
            entry.size().max(0)
        );
    }
    if let Some(perms) = entry.permissions() {
        println!("permissions: {perms:04o}");
    }
    if let Some(mtime) = entry.mtime() {
        println!("modified:    {mtime} (epoch seconds)");
    }
    if let Some(target) = entry.link_target() {
        println!("target:      {target}");
    }
}
