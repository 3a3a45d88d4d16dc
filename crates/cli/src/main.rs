//! qcache command-line entry point.
//!
//! Operates on the SQLite cache named by the loaded configuration. Results are
//! printed to stdout as JSON; logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qcache_core::{CacheConfig, CacheDb};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "qcache")]
#[command(about = "Inspect and maintain the query cache", long_about = None)]
struct Cli {
    /// Cache database path (overrides QCACHE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List resolved caching strategies
    Strategies,

    /// Invalidate a cache key
    InvalidateKey {
        key: String,

        /// Apply this strategy's invalidation mode instead of exact deletion
        #[arg(short, long)]
        strategy: Option<String>,
    },

    /// Invalidate every entry written under a tag
    InvalidateTag { tag: String },

    /// Physically delete expired entries and answers
    PurgeExpired,

    /// Look up a cached answer (counts as a hit)
    AnswerLookup {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        query: String,
    },

    /// Store an answer for a tenant's query
    AnswerStore {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        query: String,

        #[arg(short, long)]
        answer: String,

        /// Confidence in [0, 1]
        #[arg(short, long)]
        confidence: f64,

        /// TTL in seconds (default: QCACHE_ANSWER_TTL_SECONDS)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Show answer cache counters
    AnswerStats {
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Remove every cached answer of a tenant
    AnswerInvalidateTenant {
        #[arg(short, long)]
        tenant: String,
    },
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = CacheConfig::load().context("loading cache configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let db = CacheDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening cache database {}", config.db_path.display()))?;
    tracing::debug!(db_path = %config.db_path.display(), "cache database opened");

    match cli.command {
        Commands::Strategies => print_json(&commands::strategies_impl(&db, &config)),
        Commands::InvalidateKey { key, strategy } => {
            print_json(&commands::invalidate_key_impl(&db, &config, &key, strategy.as_deref()).await?)
        }
        Commands::InvalidateTag { tag } => print_json(&commands::invalidate_tag_impl(&db, &config, &tag).await?),
        Commands::PurgeExpired => print_json(&commands::purge_expired_impl(&db, &config).await?),
        Commands::AnswerLookup { tenant, query } => {
            print_json(&commands::answer_lookup_impl(&db, &config, &tenant, &query).await)
        }
        Commands::AnswerStore { tenant, query, answer, confidence, ttl } => {
            let params = commands::AnswerStoreParams {
                tenant_id: tenant,
                query,
                answer,
                confidence_score: confidence,
                ttl_seconds: ttl,
            };
            print_json(&commands::answer_store_impl(&db, &config, &params).await?)
        }
        Commands::AnswerStats { tenant } => {
            print_json(&commands::answer_stats_impl(&db, &config, tenant.as_deref()).await?)
        }
        Commands::AnswerInvalidateTenant { tenant } => {
            print_json(&commands::answer_invalidate_tenant_impl(&db, &config, &tenant).await?)
        }
    }
}
