//! # memledger CLI (`mled`)
//!
//! The `mled` binary is the primary interface for memledger. It provides
//! commands for database initialization, record loading, hybrid search,
//! context-pack assembly, triage, vector index rebuilds, and status.
//!
//! ## Usage
//!
//! ```bash
//! mled --config ./config/mled.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mled init` | Create the SQLite database and run schema migrations |
//! | `mled load <file>` | Load observation records from JSONL |
//! | `mled search "<query>"` | Hybrid lexical/vector search with fallback |
//! | `mled pack "<query>"` | Assemble a bounded context pack |
//! | `mled triage` | Extract task and error alerts |
//! | `mled rebuild` | Re-embed all records and reset the index fingerprint |
//! | `mled status` | Report embedding/index/triage health |
//! | `mled importance <id> <value>` | Fill a record's missing importance |

mod config;
mod db;
mod embedding;
mod fingerprint;
mod load;
mod migrate;
mod models;
mod packer;
mod planner;
mod rebuild;
mod scorer;
mod search;
mod status;
mod store;
mod triage;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// memledger CLI — a durable memory ledger with hybrid retrieval and
/// bounded context-pack assembly for long-running agents.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file.
#[derive(Parser)]
#[command(
    name = "mled",
    about = "memledger — durable agent memory with hybrid retrieval and context packing",
    version,
    long_about = "memledger indexes observation records for lexical and semantic retrieval, \
    extracts actionable items deterministically, and assembles bounded, auditable context \
    packs for injection into an agent prompt."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mled.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (records, record_vectors, index_meta, triage_state, FTS5 tables).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Load observation records from a JSONL file.
    ///
    /// One JSON object per line. Records are immutable once written;
    /// lines whose id already exists are skipped, never updated.
    Load {
        /// Path to the JSONL records file.
        file: PathBuf,
    },

    /// Search the ledger.
    ///
    /// Always runs a lexical search; adds a vector search when the
    /// index fingerprint matches and the embedding gateway is
    /// reachable. A companion-language fallback fires when primary
    /// results are empty or low-confidence and `--alt` was given.
    Search {
        /// The search query string.
        query: String,

        /// Companion-language translation of the query, used by the
        /// fallback path.
        #[arg(long)]
        alt: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,

        /// Emit results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Assemble a context pack for a query.
    ///
    /// Searches, then greedily packs ranked records under the item and
    /// token budgets, emitting the `context-pack.v1` document with a
    /// full inclusion/exclusion trace.
    Pack {
        /// The search query string.
        query: String,

        /// Companion-language translation of the query.
        #[arg(long)]
        alt: Option<String>,

        /// Override the configured item budget.
        #[arg(long)]
        max_items: Option<usize>,

        /// Override the configured token budget.
        #[arg(long)]
        budget_tokens: Option<usize>,
    },

    /// Run the triage engine.
    ///
    /// Deterministically extracts task candidates and recurring error
    /// signatures, deduplicates them against persisted triage state,
    /// and reports `needs_attention` / `found_new` flags.
    Triage {
        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the vector index.
    ///
    /// Clears stored vectors, re-embeds every record with the
    /// configured provider, and writes the new index fingerprint. The
    /// only operation that mutates index metadata.
    Rebuild {
        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Report embedding, index, and triage-state health.
    Status {
        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Set a record's importance if it is currently unset.
    ///
    /// Importance is fill-missing only: a record that already has an
    /// importance value is left unchanged.
    Importance {
        /// Record identifier.
        id: String,
        /// Importance value in [0, 1].
        value: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { file } => {
            load::run_load(&cfg, &file).await?;
        }
        Commands::Search {
            query,
            alt,
            limit,
            json,
        } => {
            search::run_search(&cfg, &query, alt.as_deref(), limit, json).await?;
        }
        Commands::Pack {
            query,
            alt,
            max_items,
            budget_tokens,
        } => {
            search::run_pack(&cfg, &query, alt.as_deref(), max_items, budget_tokens).await?;
        }
        Commands::Triage { json } => {
            triage::run_triage_cmd(&cfg, json).await?;
        }
        Commands::Rebuild { batch_size } => {
            rebuild::run_rebuild(&cfg, batch_size).await?;
        }
        Commands::Status { json } => {
            status::run_status(&cfg, json).await?;
        }
        Commands::Importance { id, value } => {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("importance must be in [0, 1]");
            }
            let pool = db::connect(&cfg).await?;
            let applied = store::set_importance_if_missing(&pool, &id, value).await?;
            pool.close().await;
            if applied {
                println!("importance set: {} = {:.2}", id, value);
            } else {
                println!("importance unchanged: {} already has a value (fill-missing only)", id);
            }
        }
    }

    Ok(())
}
