use concept_graph_schemas::{ConceptId, MergeId};
use thiserror::Error;

/// Failures surfaced by alias resolution, merge preview, merge and undo.
///
/// Apply and undo raise these inside their transaction, which is rolled back,
/// so returning one never leaves a partially merged graph behind.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{entity} not found: {}", .ids.join(", "))]
    NotFound { entity: &'static str, ids: Vec<String> },

    #[error("already an alias of another concept: {}", .ids.join(", "))]
    AlreadyAlias { ids: Vec<String> },

    #[error("merge {merge_id} was already undone at {undone_at}")]
    AlreadyUndone { merge_id: MergeId, undone_at: String },

    #[error("cannot undo merge, concept id now in use: {}", .ids.join(", "))]
    IdCollision { ids: Vec<String> },

    #[error("merge {merge_id} has an unusable snapshot: {reason}")]
    InvalidSnapshot { merge_id: MergeId, reason: String },

    #[error("no duplicate concepts left after removing the canonical id")]
    EmptyInput,

    #[error("edge endpoints resolve to the same concept {id}")]
    SelfReference { id: ConceptId },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MergeError {
    pub(crate) fn concepts_not_found(ids: &[ConceptId]) -> Self {
        MergeError::NotFound {
            entity: "concept",
            ids: ids.iter().map(|id| id.0.clone()).collect(),
        }
    }

    pub(crate) fn merge_not_found(id: &MergeId) -> Self {
        MergeError::NotFound {
            entity: "merge",
            ids: vec![id.0.clone()],
        }
    }

    pub(crate) fn already_alias(ids: &[ConceptId]) -> Self {
        MergeError::AlreadyAlias {
            ids: ids.iter().map(|id| id.0.clone()).collect(),
        }
    }
}

pub type MergeResult<T> = std::result::Result<T, MergeError>;
