//! Merge request normalization, validation and the read-only preview.

use concept_graph_schemas::{
    Concept, ConceptId, ConceptSummary, Edge, EdgeAction, EdgeChange, MergeCounts, MergePreview,
};
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::debug;

use crate::alias;
use crate::error::{MergeError, MergeResult};
use crate::store;

/// A canonical id plus the normalized, non-empty list of duplicates to fold
/// into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    canonical_id: ConceptId,
    duplicate_ids: Vec<ConceptId>,
}

impl MergeRequest {
    /// Deduplicate `duplicate_ids` keeping first occurrences and drop the
    /// canonical id. Nothing left is `EmptyInput`.
    pub fn new(canonical_id: &ConceptId, duplicate_ids: &[ConceptId]) -> MergeResult<Self> {
        let mut seen = HashSet::new();
        let duplicate_ids: Vec<ConceptId> = duplicate_ids
            .iter()
            .filter(|id| *id != canonical_id)
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();

        if duplicate_ids.is_empty() {
            return Err(MergeError::EmptyInput);
        }

        Ok(Self {
            canonical_id: canonical_id.clone(),
            duplicate_ids,
        })
    }

    pub fn canonical_id(&self) -> &ConceptId {
        &self.canonical_id
    }

    pub fn duplicate_ids(&self) -> &[ConceptId] {
        &self.duplicate_ids
    }

    fn is_duplicate(&self, id: &ConceptId) -> bool {
        self.duplicate_ids.contains(id)
    }

    /// Replace a duplicate id with the canonical id; other ids pass through
    pub fn substitute<'a>(&'a self, id: &'a ConceptId) -> &'a ConceptId {
        if self.is_duplicate(id) {
            &self.canonical_id
        } else {
            id
        }
    }

    /// Predicted endpoints of `edge` once the merge has run
    pub fn substituted_endpoints(&self, edge: &Edge) -> (ConceptId, ConceptId) {
        (
            self.substitute(&edge.from_concept_id).clone(),
            self.substitute(&edge.to_concept_id).clone(),
        )
    }
}

/// Live rows the merge will operate on, returned once validation passes
#[derive(Debug)]
pub(crate) struct ValidatedMerge {
    pub canonical: Concept,
    pub duplicates: Vec<Concept>,
}

/// Checks shared by preview and apply: the canonical concept exists and is
/// not an alias, no duplicate is an alias, every duplicate is live.
pub(crate) fn validate(conn: &Connection, request: &MergeRequest) -> MergeResult<ValidatedMerge> {
    let canonical = store::get_concept(conn, request.canonical_id())?.ok_or_else(|| {
        MergeError::concepts_not_found(std::slice::from_ref(request.canonical_id()))
    })?;

    if alias::is_alias(conn, request.canonical_id())? {
        return Err(MergeError::already_alias(std::slice::from_ref(
            request.canonical_id(),
        )));
    }

    let aliased = alias::alias_ids_among(conn, request.duplicate_ids())?;
    if !aliased.is_empty() {
        return Err(MergeError::already_alias(&aliased));
    }

    let duplicates = store::get_concepts(conn, request.duplicate_ids())?;
    if duplicates.len() != request.duplicate_ids().len() {
        let missing: Vec<ConceptId> = request
            .duplicate_ids()
            .iter()
            .filter(|id| !duplicates.iter().any(|concept| &concept.id == *id))
            .cloned()
            .collect();
        return Err(MergeError::concepts_not_found(&missing));
    }

    Ok(ValidatedMerge {
        canonical,
        duplicates,
    })
}

/// Classify one edge that touches a duplicate. Collapsed endpoints mean
/// the edge would become a self-loop and is deleted.
pub(crate) fn classify_edge(request: &MergeRequest, edge: &Edge) -> EdgeChange {
    let (from_after, to_after) = request.substituted_endpoints(edge);
    let action = if from_after == to_after {
        EdgeAction::Delete
    } else {
        EdgeAction::Rewire
    };

    EdgeChange {
        edge_id: edge.id.clone(),
        edge_type: edge.edge_type,
        action,
        from_before: edge.from_concept_id.clone(),
        to_before: edge.to_concept_id.clone(),
        from_after,
        to_after,
        evidence_count: edge.evidence_chunk_ids.len(),
    }
}

/// Compute the diff a merge would produce without writing anything.
///
/// `edge_limit` caps only the listed `edge_changes`; `counts` always cover
/// every affected edge so they agree with what apply would record.
pub fn preview_merge(
    conn: &Connection,
    request: &MergeRequest,
    edge_limit: Option<usize>,
) -> MergeResult<MergePreview> {
    let validated = validate(conn, request)?;

    let edges = store::edges_touching(conn, request.duplicate_ids())?;
    let changes: Vec<EdgeChange> = edges.iter().map(|edge| classify_edge(request, edge)).collect();

    let edges_deleted = changes
        .iter()
        .filter(|change| change.action == EdgeAction::Delete)
        .count();
    let counts = MergeCounts {
        edges_rewired: changes.len() - edges_deleted,
        edges_deleted,
        review_items: store::review_items_for(conn, request.duplicate_ids())?.len(),
        source_links: store::source_links_for(conn, request.duplicate_ids())?.len(),
    };

    let limit = edge_limit.unwrap_or(usize::MAX);
    let edges_truncated = changes.len() > limit;
    let edge_changes: Vec<EdgeChange> = changes.into_iter().take(limit).collect();

    debug!(
        "Preview merge into {}: {:?} (truncated: {})",
        request.canonical_id(),
        counts,
        edges_truncated
    );

    Ok(MergePreview {
        canonical: ConceptSummary::from(&validated.canonical),
        duplicates: validated.duplicates.iter().map(ConceptSummary::from).collect(),
        edge_changes,
        counts,
        edges_truncated,
    })
}
