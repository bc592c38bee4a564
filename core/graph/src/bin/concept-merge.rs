//! Concept Merge Tool - previews, applies and undoes concept merges
//!
//! Usage:
//!   cargo run --bin concept-merge -- [--db-path <path>] <command>
//!
//! Commands:
//!   preview <canonical> <duplicate>...   Show what a merge would change
//!   apply <canonical> <duplicate>...     Merge duplicates into the canonical concept
//!   undo <merge-id>                      Reverse a merge from its snapshot
//!   resolve <concept-id>...              Follow aliases to their canonical concepts
//!   history [--concept <id>]             List past merges
//!
//! DB_PATH and MERGE_PREVIEW_EDGE_LIMIT are read from the environment when the
//! matching flags are absent.

use anyhow::Result;
use clap::{Parser, Subcommand};
use concept_graph_schemas::{ConceptAlias, ConceptId, MergeId};
use concept_graph_store::{alias, Config, Database};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "concept-merge")]
#[command(about = "Merge duplicate concepts and undo past merges")]
struct Args {
    /// Path to SQLite database file
    #[arg(long, short)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the edges, review items and source links a merge would touch
    Preview {
        canonical: String,
        #[arg(required = true)]
        duplicates: Vec<String>,
        /// Maximum number of edge changes to list
        #[arg(long)]
        edge_limit: Option<usize>,
    },
    /// Merge duplicates into the canonical concept
    Apply {
        canonical: String,
        #[arg(required = true)]
        duplicates: Vec<String>,
    },
    /// Undo a merge by id
    Undo { merge_id: String },
    /// Resolve concept ids through the alias table
    Resolve {
        #[arg(required = true)]
        concept_ids: Vec<String>,
    },
    /// List merges, newest first
    History {
        #[arg(long)]
        concept: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Serialize)]
struct Resolution {
    id: String,
    canonical_id: String,
    is_alias: bool,
    /// Every id currently forwarding to `canonical_id`
    aliases: Vec<ConceptAlias>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn concept_ids(raw: Vec<String>) -> Vec<ConceptId> {
    raw.into_iter().map(ConceptId).collect()
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.db_path {
        Some(path) => Config::from_lookup(|key| match key {
            "DB_PATH" => Some(path.display().to_string()),
            other => std::env::var(other).ok(),
        })?,
        None => Config::from_env()?,
    };

    info!("Database: {}", config.db_path.display());
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut db = Database::new(&config.db_path)?;

    match args.command {
        Command::Preview {
            canonical,
            duplicates,
            edge_limit,
        } => {
            if edge_limit.is_some() {
                config.preview_edge_limit = edge_limit;
            }
            let preview = db.preview_merge(
                &ConceptId(canonical),
                &concept_ids(duplicates),
                config.preview_edge_limit,
            )?;
            info!(
                "Preview: {} rewired, {} deleted, {} review items, {} source links",
                preview.counts.edges_rewired,
                preview.counts.edges_deleted,
                preview.counts.review_items,
                preview.counts.source_links
            );
            print_json(&preview)?;
        }
        Command::Apply {
            canonical,
            duplicates,
        } => {
            let record = db.apply_merge(&ConceptId(canonical), &concept_ids(duplicates))?;
            print_json(&record)?;
        }
        Command::Undo { merge_id } => {
            let record = db.undo_merge(&MergeId(merge_id))?;
            print_json(&record)?;
        }
        Command::Resolve { concept_ids: raw } => {
            let ids = concept_ids(raw);
            let canonicals = alias::resolve_aliases(db.conn(), &ids)?;
            let mut resolutions = Vec::with_capacity(ids.len());
            for (id, canonical) in ids.into_iter().zip(canonicals) {
                resolutions.push(Resolution {
                    is_alias: alias::is_alias(db.conn(), &id)?,
                    aliases: alias::aliases_of(db.conn(), &canonical.as_concept_id())?,
                    canonical_id: canonical.0,
                    id: id.0,
                });
            }
            print_json(&resolutions)?;
        }
        Command::History { concept, limit } => {
            let concept = concept.map(ConceptId);
            let merges = db.list_merges(concept.as_ref(), limit)?;
            info!("Found {} merge(s)", merges.len());
            print_json(&merges)?;
        }
    }

    Ok(())
}
