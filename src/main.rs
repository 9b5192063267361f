//! # propsearch CLI
//!
//! Natural-language real-estate search from the command line, plus the HTTP
//! server that exposes the same pipeline.
//!
//! ## Usage
//!
//! ```bash
//! propsearch --config ./config/propsearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `propsearch init` | Create the SQLite database and run schema migrations |
//! | `propsearch import <file.json>` | Load a JSON array of listings |
//! | `propsearch intent "<query>"` | Show the structured intent parsed from a query |
//! | `propsearch search "<query>"` | Search listings (add `--stream` to watch progress) |
//! | `propsearch serve` | Start the HTTP server |
//!
//! Log verbosity is controlled by the `LOG_LEVEL` environment variable
//! (`info` by default); logs go to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use propsearch::config;
use propsearch::search::SearchRequest;
use propsearch::{import, intent, migrate, search, server};
use propsearch_core::filters::FilterSet;
use propsearch_core::intent::parse_amount;
use propsearch_core::models::UnitType;

/// propsearch: natural-language search over property listings.
#[derive(Parser)]
#[command(
    name = "propsearch",
    about = "Natural-language real-estate search with streaming intent parsing and hybrid ranking",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/propsearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Import listings from a JSON file (an array of listings).
    ///
    /// Existing listings with the same id are replaced.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Parse a query into a structured intent and print it as JSON.
    Intent {
        query: String,
    },

    /// Search listings.
    Search {
        /// The search query, e.g. "3 bedroom condo in Punggol under 1.5M".
        query: String,

        /// Stream progress (thinking, intent, results) to stderr.
        #[arg(long)]
        stream: bool,

        /// Print results as JSON on stdout.
        #[arg(long)]
        json: bool,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<i64>,

        /// Number of results to skip.
        #[arg(long)]
        offset: Option<i64>,

        /// Minimum price (accepts 800k, 1.2M, S$900,000).
        #[arg(long, value_parser = parse_price)]
        min_price: Option<f64>,

        /// Maximum price (accepts 800k, 1.2M, S$900,000).
        #[arg(long, value_parser = parse_price)]
        max_price: Option<f64>,

        /// Exact number of bedrooms.
        #[arg(long)]
        bedrooms: Option<i64>,

        /// HDB, Condo, Landed or Executive.
        #[arg(long)]
        unit_type: Option<UnitType>,

        /// Town, estate or district.
        #[arg(long)]
        location: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn parse_price(s: &str) -> Result<f64, String> {
    parse_amount(s).ok_or_else(|| format!("invalid price: '{}'", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            import::run_import(&cfg, &file).await?;
        }
        Commands::Intent { query } => {
            intent::run_intent(&cfg, &query).await?;
        }
        Commands::Search {
            query,
            stream,
            json,
            top_k,
            offset,
            min_price,
            max_price,
            bedrooms,
            unit_type,
            location,
        } => {
            let mut req = SearchRequest::new(query);
            req.options.top_k = top_k;
            req.options.offset = offset;
            req.filters = FilterSet {
                price_min: min_price,
                price_max: max_price,
                bedrooms,
                unit_type,
                location,
                ..FilterSet::default()
            };
            search::run_search(&cfg, req, stream, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
