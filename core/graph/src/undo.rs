use chrono::Utc;
use concept_graph_schemas::{ConceptId, ConceptMerge, MergeDetails, MergeId};
use rusqlite::Transaction;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::alias;
use crate::error::{MergeError, MergeResult};
use crate::history;
use crate::store;

/// Reject snapshots whose contents cannot describe this merge
fn check_snapshot(
    merge_id: &MergeId,
    duplicate_ids: &[ConceptId],
    details: &MergeDetails,
) -> MergeResult<()> {
    let invalid = |reason: String| MergeError::InvalidSnapshot {
        merge_id: merge_id.clone(),
        reason,
    };

    let expected: BTreeSet<&ConceptId> = duplicate_ids.iter().collect();
    let captured: BTreeSet<&ConceptId> = details
        .duplicate_concepts
        .iter()
        .map(|concept| &concept.id)
        .collect();

    if expected.is_empty() {
        return Err(invalid("merge lists no duplicate concepts".to_string()));
    }
    if captured.len() != details.duplicate_concepts.len() {
        return Err(invalid("snapshot repeats a duplicate concept".to_string()));
    }
    if expected != captured {
        return Err(invalid(format!(
            "snapshot holds {} duplicate concept(s), merge lists {}",
            captured.len(),
            expected.len()
        )));
    }
    Ok(())
}

/// Restore the graph to its state immediately before merge `merge_id`.
///
/// Runs entirely on `tx`; the caller commits. On error the merged state
/// stays in place and the merge remains not undone.
pub fn undo_merge(tx: &Transaction<'_>, merge_id: &MergeId) -> MergeResult<ConceptMerge> {
    let row = history::load_merge_row(tx, merge_id)?
        .ok_or_else(|| MergeError::merge_not_found(merge_id))?;

    if let Some(undone_at) = &row.undone_at {
        return Err(MergeError::AlreadyUndone {
            merge_id: merge_id.clone(),
            undone_at: undone_at.clone(),
        });
    }

    let mut record = row.into_merge()?;
    check_snapshot(merge_id, &record.duplicate_ids, &record.details)?;
    let details = &record.details;

    let taken: Vec<String> = store::get_concepts(tx, &record.duplicate_ids)?
        .into_iter()
        .map(|concept| concept.id.0)
        .collect();
    if !taken.is_empty() {
        return Err(MergeError::IdCollision { ids: taken });
    }

    for concept in &details.duplicate_concepts {
        store::insert_concept(tx, concept)?;
    }

    for rewire in &details.rewired_edges {
        let updated = store::update_edge_endpoints(
            tx,
            &rewire.edge_id,
            &rewire.from_before,
            &rewire.to_before,
        )?;
        if updated == 0 {
            warn!(
                "Edge {} no longer exists, cannot restore {} -> {}",
                rewire.edge_id, rewire.from_before, rewire.to_before
            );
        }
    }

    // insert_edge writes evidence links in the captured order
    for edge in &details.deleted_edges {
        store::insert_edge(tx, edge)?;
    }

    for reassignment in &details.review_items {
        let updated = store::set_review_item_concept(
            tx,
            &reassignment.review_item_id,
            Some(&reassignment.previous_concept_id),
        )?;
        if updated == 0 {
            warn!(
                "Review item {} no longer exists, skipping",
                reassignment.review_item_id
            );
        }
    }

    for link in &details.added_source_links {
        store::delete_concept_source(tx, link)?;
    }
    for link in &details.removed_source_links {
        store::insert_concept_source(tx, link)?;
    }

    let retired = alias::delete_aliases_for_merge(tx, merge_id)?;
    debug!("Retired {} alias(es) of merge {}", retired, merge_id);

    let undone_at = Utc::now().to_rfc3339();
    history::mark_undone(tx, merge_id, &undone_at)?;
    record.undone_at = Some(undone_at);

    Ok(record)
}
