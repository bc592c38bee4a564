use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

/// Runtime settings for the merge tooling, read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub preview_edge_limit: Option<usize>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = match lookup("DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let home = lookup("HOME")
                    .ok_or_else(|| anyhow!("neither DB_PATH nor HOME is set"))?;
                PathBuf::from(format!(
                    "{}/Library/Application Support/ConceptGraph/graph.db",
                    home
                ))
            }
        };

        let preview_edge_limit = match lookup("MERGE_PREVIEW_EDGE_LIMIT") {
            Some(raw) => {
                let limit: usize = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("MERGE_PREVIEW_EDGE_LIMIT is not a number: {}", raw))?;
                if limit == 0 {
                    anyhow::bail!("MERGE_PREVIEW_EDGE_LIMIT must be positive");
                }
                Some(limit)
            }
            None => None,
        };

        Ok(Self {
            db_path,
            preview_edge_limit,
        })
    }
}
