//! drivefs command-line front end.
//!
//! ```bash
//! drivefs drives
//! drivefs mkdir user/notes/
//! echo "buy milk" | drivefs put user/notes/todo.txt
//! drivefs mount work ~/src/work
//! drivefs watch user/notes/
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use drivefs_kernel::{PathPicker, Vfs, VfsConfig};

const DEFAULT_LOG_FILTER: &str = "drivefs=info,drivefs_kernel=info";

/// One filesystem over bundled, persisted, and mounted drives
#[derive(Parser, Debug)]
#[command(name = "drivefs", version)]
struct Args {
    /// Directory holding the state database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file to load instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached drives
    Drives,
    /// List a folder
    Ls { path: String },
    /// Print a file
    Cat { path: String },
    /// Write a file, reading stdin when TEXT is omitted
    Put { path: String, text: Option<String> },
    /// Create a folder and its parents
    Mkdir { path: String },
    /// Delete a file
    Rm { path: String },
    /// Delete a folder and everything under it
    Rmdir { path: String },
    /// Copy a folder's contents into another folder
    Cp { from: String, to: String },
    /// Attach a host directory as a drive
    Mount { name: String, dir: PathBuf },
    /// Detach a mounted drive
    Unmount { name: String },
    /// Print changes under a path until interrupted
    Watch { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => VfsConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => VfsConfig::load().context("Failed to load configuration")?,
    };
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    let default_filter = config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::debug!(data_dir = %config.data_dir.display(), "opening drivefs");
    let vfs = Vfs::open(&config)
        .await
        .with_context(|| format!("Failed to open state in {}", config.data_dir.display()))?;

    run(&vfs, args.command).await
}

async fn run(vfs: &Vfs, command: Command) -> Result<()> {
    match command {
        Command::Drives => {
            for name in vfs.drives() {
                println!("{name}");
            }
        }
        Command::Ls { path } => {
            for entry in vfs.list(&folder(&path))? {
                println!("{}", entry.name);
            }
        }
        Command::Cat { path } => match vfs.get(&path)? {
            Some(content) => print!("{content}"),
            None => bail!("{path}: no such file"),
        },
        Command::Put { path, text } => {
            let content = match text {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut buf)
                        .await
                        .context("Failed to read stdin")?;
                    buf
                }
            };
            vfs.put(&path, &content).await?;
        }
        Command::Mkdir { path } => vfs.mkdirp(&path).await?,
        Command::Rm { path } => vfs.rm(&path).await?,
        Command::Rmdir { path } => vfs.rmdir(&path).await?,
        Command::Cp { from, to } => {
            vfs.mkdirp(&to).await?;
            vfs.copy_tree(&folder(&from), &folder(&to)).await?;
        }
        Command::Mount { name, dir } => {
            let picker = PathPicker::new(&dir);
            vfs.mount(&name, &picker)
                .await
                .with_context(|| format!("Failed to mount {} as {name}", dir.display()))?;
            tracing::info!(drive = %name, dir = %dir.display(), "mounted");
        }
        Command::Unmount { name } => vfs.unmount(&name)?,
        Command::Watch { path } => {
            let watched = path.clone();
            let handle = vfs.watch_tree(&path, move |kind| println!("{kind} {watched}"));
            tracing::info!(prefix = handle.prefix(), "watching, Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            handle.cancel();
        }
    }
    Ok(())
}

fn folder(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}
