use chrono::Utc;
use concept_graph_schemas::{
    generate_merge_id, CanonicalConceptId, ConceptAlias, ConceptMerge, ConceptSource,
    EdgeAction, EdgeRewire, MergeDetails, ReviewReassignment,
};
use rusqlite::Transaction;
use tracing::debug;

use crate::alias;
use crate::error::MergeResult;
use crate::history;
use crate::merge::{self, MergeRequest};
use crate::store;

/// Fold every duplicate in `request` into its canonical concept.
///
/// Runs entirely on `tx`; the caller commits. Returning an error leaves the
/// transaction to roll back, so no partial merge is ever visible. The
/// returned record carries the full reversal snapshot.
pub fn apply_merge(tx: &Transaction<'_>, request: &MergeRequest) -> MergeResult<ConceptMerge> {
    // A preview may be stale by now
    let validated = merge::validate(tx, request)?;

    let canonical_id = request.canonical_id();
    let duplicate_ids = request.duplicate_ids();
    let now = Utc::now().to_rfc3339();

    let mut record = ConceptMerge {
        id: generate_merge_id(),
        canonical_id: canonical_id.clone(),
        duplicate_ids: duplicate_ids.to_vec(),
        details: MergeDetails::empty(),
        created_at: now.clone(),
        undone_at: None,
    };
    history::insert_merge_record(tx, &record)?;

    let mut details = MergeDetails::empty();
    details.duplicate_concepts = validated.duplicates;

    // Edges: collapse self-loops, rewire the rest
    for edge in store::edges_touching(tx, duplicate_ids)? {
        let change = merge::classify_edge(request, &edge);
        match change.action {
            EdgeAction::Delete => {
                debug!(
                    "Deleting edge {} ({} evidence chunks), collapses to self-loop on {}",
                    edge.id,
                    edge.evidence_chunk_ids.len(),
                    canonical_id
                );
                store::delete_edge(tx, &edge.id)?;
                details.deleted_edges.push(edge);
            }
            EdgeAction::Rewire => {
                if change.from_after == change.from_before && change.to_after == change.to_before {
                    continue;
                }
                store::update_edge_endpoints(tx, &edge.id, &change.from_after, &change.to_after)?;
                details.rewired_edges.push(EdgeRewire {
                    edge_id: change.edge_id,
                    from_before: change.from_before,
                    to_before: change.to_before,
                    from_after: change.from_after,
                    to_after: change.to_after,
                });
            }
        }
    }

    // Review items follow their concept
    for item in store::review_items_for(tx, duplicate_ids)? {
        if let Some(previous_concept_id) = item.concept_id {
            store::set_review_item_concept(tx, &item.id, Some(canonical_id))?;
            details.review_items.push(ReviewReassignment {
                review_item_id: item.id,
                previous_concept_id,
            });
        }
    }

    // Source links, with set semantics on the canonical side
    for link in store::source_links_for(tx, duplicate_ids)? {
        let moved = ConceptSource {
            concept_id: canonical_id.clone(),
            source_id: link.source_id.clone(),
            created_at: link.created_at.clone(),
        };
        if store::insert_concept_source(tx, &moved)? {
            details.added_source_links.push(moved);
        }
        details.removed_source_links.push(link);
    }
    store::delete_source_links_for(tx, duplicate_ids)?;

    for duplicate_id in duplicate_ids {
        alias::insert_alias(
            tx,
            &ConceptAlias {
                alias_id: duplicate_id.clone(),
                canonical_id: CanonicalConceptId(canonical_id.0.clone()),
                merge_id: record.id.clone(),
                created_at: now.clone(),
            },
        )?;
        details.alias_ids.push(duplicate_id.clone());
    }

    for duplicate_id in duplicate_ids {
        store::delete_concept(tx, duplicate_id)?;
    }

    history::write_details(tx, &record.id, &details)?;
    record.details = details;

    debug!(
        "Merge {} recorded: {:?}",
        record.id,
        record.details.counts()
    );
    Ok(record)
}
