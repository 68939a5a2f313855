use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use krill::app::App;
use krill::config::Config;
use krill::export::SanitizeLevel;
use krill::feed::{read_feed_list, FeedRef};
use krill::ingest::FeedSource;
use krill::{logging, AppError, Result};

/// Krill - RSS/Atom ingestion into a deduplicated corpus
#[derive(Parser, Debug)]
#[command(name = "krill")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest feeds once; with no source, every active feed in the store
    Ingest {
        /// Feed URLs
        urls: Vec<String>,

        /// OPML file of feeds
        #[arg(long, conflicts_with = "list")]
        opml: Option<PathBuf>,

        /// JSON array of feed URLs or outline objects
        #[arg(long)]
        list: Option<PathBuf>,

        /// Keep feed content instead of fetching each full page
        #[arg(long)]
        no_fetch: bool,
    },

    /// Ingest active feeds on the configured interval until interrupted
    Run,

    /// Load feeds from an OPML file into the store
    Load {
        /// OPML file
        opml: PathBuf,
    },

    /// Show the status of the store
    Info {
        /// Also print the active configuration
        #[arg(long = "config")]
        show_config: bool,
    },

    /// Export posts as HTML files, one directory per category
    Export {
        /// Output directory
        dir: PathBuf,

        /// Only export these categories
        #[arg(short = 'C', long = "category")]
        categories: Vec<String>,

        /// Sanitize level: raw, safe or text
        #[arg(long, default_value = "safe", value_parser = parse_sanitize_level)]
        level: SanitizeLevel,
    },
}

fn parse_sanitize_level(s: &str) -> std::result::Result<SanitizeLevel, String> {
    s.parse().map_err(|e: AppError| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    logging::init(&config.logging)?;

    let app = App::new(&config).await?;

    match cli.command {
        Commands::Ingest {
            urls,
            opml,
            list,
            no_fetch,
        } => {
            let source = if let Some(path) = opml {
                FeedSource::Opml(path)
            } else if let Some(path) = list {
                let mut refs = read_feed_list(&path)?;
                refs.extend(urls.into_iter().map(FeedRef::Url));
                FeedSource::Refs(refs)
            } else if !urls.is_empty() {
                FeedSource::Refs(urls.into_iter().map(FeedRef::Url).collect())
            } else {
                FeedSource::Active
            };
            println!("{}", app.ingest(source, !no_fetch).await?);
        }
        Commands::Run => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted, stopping after the current run");
                    let _ = tx.send(true);
                }
            });
            let runs = app.run_service(rx).await?;
            println!("Completed {} scheduled runs", runs);
        }
        Commands::Load { opml } => {
            let rows = app.import_opml(&opml).await?;
            println!("Ingested {} feeds from {}", rows, opml.display());
        }
        Commands::Info { show_config } => {
            print!("{}", app.summary().await?);
            if show_config {
                println!();
                println!("Configuration:");
                println!("  db_path: {}", config.db_path);
                println!("  fetch_html: {}", config.fetch_html);
                println!("  workers: {}", config.workers);
                println!("  ingest_interval_minutes: {}", config.ingest_interval_minutes);
                println!("  stop_on_error: {}", config.stop_on_error);
                println!("  user_agent: {}", config.http.user_agent);
                println!("  log level: {}", config.logging.level);
            }
        }
        Commands::Export {
            dir,
            categories,
            level,
        } => {
            let counts = app.export(&dir, categories, level).await?;
            println!(
                "Exported {} posts in {} categories to {}",
                counts.total(),
                counts.len(),
                dir.display()
            );
        }
    }

    Ok(())
}
