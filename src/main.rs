mod database;
mod error;
mod ingest;
mod media;
mod search;
mod server;
mod utils;

use std::path::PathBuf;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

use crate::search::library::ImageLibrary;
use crate::utils::config::{self, Overrides};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding one sub-directory per image category
    #[arg(short, long, global = true, env = "IMAGE_BASE_DIR")]
    base_dir: Option<PathBuf>,

    #[arg(short, long, global = true, env = "IMAGE_DB_PATH")]
    db_path: Option<PathBuf>,

    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Write the resolved settings back to the env file
    #[arg(long, global = true)]
    remember: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index the dataset, then serve the search API
    Serve {
        #[arg(long, env = "SERVER_HOST")]
        host: Option<String>,
        #[arg(short, long, env = "SERVER_PORT")]
        port: Option<u16>,
    },
    /// Rebuild the index and exit
    Index,
    /// Search the existing index by category name
    Search {
        query: String,
        /// Maximum number of images returned [default: 6]
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show recent searches
    History {
        /// Maximum number of entries shown [default: 10]
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show per-category image counts
    Stats,
    /// List category names
    Categories,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("image_search=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Serve { host: None, port: None });

    let (host, port) = match &command {
        Command::Serve { host, port } => (host.clone(), *port),
        _ => (None, None),
    };
    let settings = config::load_settings(
        &args.env_file,
        Overrides { base_dir: args.base_dir, db_path: args.db_path, host, port },
    )?;
    if args.remember {
        config::save_to_env(&args.env_file, &settings)?;
        info!("Saved settings to {:?}", args.env_file);
    }

    info!("Base directory: {:?}", settings.base_dir);
    info!("DB: {:?}", settings.db_path);

    let mut library = ImageLibrary::open(&settings.base_dir, &settings.db_path)
        .with_context(|| format!("Failed to open database {:?}", settings.db_path))?;

    match command {
        Command::Serve { .. } => {
            // Index fully before accepting any request.
            if let Err(e) = library.reindex() {
                error!("Indexing failed, serving an empty index: {}", e);
            }
            server::routes::serve(library, format!("{}:{}", settings.host, settings.port)).await?;
        }
        Command::Index => {
            let report = library.reindex()?;
            println!(
                "Indexed {} images in {} categories ({} folders skipped)",
                report.images, report.categories, report.skipped
            );
        }
        Command::Search { query, limit } => {
            let results = match limit {
                Some(limit) => library.search_limited(&query, limit),
                None => library.search(&query),
            };
            print_json(&results)?;
        }
        Command::History { limit } => {
            let entries = match limit {
                Some(limit) => library.history_limited(limit),
                None => library.history(),
            };
            print_json(&entries)?;
        }
        Command::Stats => print_json(&library.stats())?,
        Command::Categories => print_json(&library.categories())?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
