//! One-hop alias resolution.
//!
//! A merge leaves one `concept_alias` row per consumed duplicate, pointing
//! at the canonical concept. Merges refuse to consume an alias or merge into
//! one, so a lookup never has to follow more than a single row.

use chrono::Utc;
use concept_graph_schemas::{
    generate_edge_id, CanonicalConceptId, ChunkId, ConceptAlias, ConceptId, Edge, EdgeType,
    MergeId,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{MergeError, MergeResult};
use crate::store::{self, placeholders};

fn row_to_alias(row: &Row) -> rusqlite::Result<ConceptAlias> {
    Ok(ConceptAlias {
        alias_id: ConceptId(row.get(0)?),
        canonical_id: CanonicalConceptId(row.get(1)?),
        merge_id: MergeId(row.get(2)?),
        created_at: row.get(3)?,
    })
}

/// Map a possibly merged-away id to the concept that absorbed it. Ids that
/// are not aliases come back unchanged.
pub fn resolve_alias(conn: &Connection, id: &ConceptId) -> MergeResult<CanonicalConceptId> {
    let canonical: Option<String> = conn
        .query_row(
            "SELECT canonical_id FROM concept_alias WHERE alias_id = ?1",
            params![id.0],
            |row| row.get(0),
        )
        .optional()?;

    Ok(CanonicalConceptId(canonical.unwrap_or_else(|| id.0.clone())))
}

/// `resolve_alias` over a batch, results in input order
pub fn resolve_aliases(
    conn: &Connection,
    ids: &[ConceptId],
) -> MergeResult<Vec<CanonicalConceptId>> {
    ids.iter().map(|id| resolve_alias(conn, id)).collect()
}

/// Resolve both endpoints of an edge about to be written. Endpoints that
/// land on the same concept are rejected; such an edge would be a self-loop.
pub fn resolve_edge_endpoints(
    conn: &Connection,
    from: &ConceptId,
    to: &ConceptId,
) -> MergeResult<(CanonicalConceptId, CanonicalConceptId)> {
    let from = resolve_alias(conn, from)?;
    let to = resolve_alias(conn, to)?;

    if from == to {
        return Err(MergeError::SelfReference {
            id: from.as_concept_id(),
        });
    }
    Ok((from, to))
}

pub fn is_alias(conn: &Connection, id: &ConceptId) -> MergeResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM concept_alias WHERE alias_id = ?1",
            params![id.0],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    Ok(found)
}

/// The subset of `ids` that are currently aliases, in the order given.
pub fn alias_ids_among(conn: &Connection, ids: &[ConceptId]) -> MergeResult<Vec<ConceptId>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT alias_id FROM concept_alias WHERE alias_id IN ({})",
        placeholders(ids.len())
    ))?;
    let found = stmt
        .query_map(params_from_iter(ids.iter().map(|id| id.0.as_str())), |row| {
            row.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ids
        .iter()
        .filter(|id| found.contains(&id.0))
        .cloned()
        .collect())
}

/// Every alias currently forwarding to `canonical_id`
pub fn aliases_of(conn: &Connection, canonical_id: &ConceptId) -> MergeResult<Vec<ConceptAlias>> {
    let mut stmt = conn.prepare(
        "SELECT alias_id, canonical_id, merge_id, created_at
         FROM concept_alias
         WHERE canonical_id = ?1
         ORDER BY created_at, alias_id",
    )?;
    let aliases = stmt
        .query_map(params![canonical_id.0], row_to_alias)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(aliases)
}

pub(crate) fn insert_alias(conn: &Connection, alias: &ConceptAlias) -> MergeResult<()> {
    conn.execute(
        "INSERT INTO concept_alias (alias_id, canonical_id, merge_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            alias.alias_id.0,
            alias.canonical_id.0,
            alias.merge_id.0,
            alias.created_at
        ],
    )?;
    debug!("Aliased {} -> {}", alias.alias_id, alias.canonical_id);
    Ok(())
}

pub(crate) fn delete_aliases_for_merge(
    conn: &Connection,
    merge_id: &MergeId,
) -> MergeResult<usize> {
    let deleted = conn.execute(
        "DELETE FROM concept_alias WHERE merge_id = ?1",
        params![merge_id.0],
    )?;
    Ok(deleted)
}

/// Fields of an edge supplied by a write path that does not know whether
/// its endpoint ids have been merged away.
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub from_concept_id: ConceptId,
    pub to_concept_id: ConceptId,
    pub edge_type: EdgeType,
    pub source_url: Option<String>,
    pub confidence: Option<f64>,
    pub verifier_score: Option<f64>,
    pub evidence_chunk_ids: Vec<ChunkId>,
}

/// Create an edge after resolving both endpoints through the alias table,
/// so the stored edge never references a consumed duplicate.
pub fn create_edge_resolved(conn: &Connection, new_edge: NewEdge) -> MergeResult<Edge> {
    let (from, to) =
        resolve_edge_endpoints(conn, &new_edge.from_concept_id, &new_edge.to_concept_id)?;

    let mut evidence_chunk_ids = new_edge.evidence_chunk_ids;
    evidence_chunk_ids.sort();
    evidence_chunk_ids.dedup();

    let edge = Edge {
        id: generate_edge_id(),
        from_concept_id: from.into(),
        to_concept_id: to.into(),
        edge_type: new_edge.edge_type,
        source_url: new_edge.source_url,
        confidence: new_edge.confidence,
        verifier_score: new_edge.verifier_score,
        created_at: Utc::now().to_rfc3339(),
        evidence_chunk_ids,
    };
    store::insert_edge(conn, &edge)?;
    Ok(edge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use concept_graph_schemas::{Concept, ConceptKind, ConceptMerge, MergeDetails};
    use tempfile::NamedTempFile;

    fn seed(db: &Database, id: &str) {
        let now = Utc::now().to_rfc3339();
        db.insert_concept(&Concept {
            id: id.into(),
            title: id.to_string(),
            kind: ConceptKind::Concept,
            l0_summary: None,
            l1_summary: None,
            l2_summary: None,
            module: None,
            note_source: None,
            context: None,
            mastery_score: 0.0,
            created_at: now.clone(),
            updated_at: now,
        })
        .unwrap();
    }

    fn seed_alias(db: &Database, alias_id: &str, canonical_id: &str) {
        let merge = ConceptMerge {
            id: MergeId(format!("merge_{}", alias_id)),
            canonical_id: canonical_id.into(),
            duplicate_ids: vec![alias_id.into()],
            details: MergeDetails::empty(),
            created_at: Utc::now().to_rfc3339(),
            undone_at: None,
        };
        crate::history::insert_merge_record(db.conn(), &merge).unwrap();
        insert_alias(
            db.conn(),
            &ConceptAlias {
                alias_id: alias_id.into(),
                canonical_id: CanonicalConceptId(canonical_id.to_string()),
                merge_id: merge.id.clone(),
                created_at: merge.created_at.clone(),
            },
        )
        .unwrap();
    }

    #[test]
    fn test_resolve_is_identity_for_unknown_ids() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let resolved = resolve_alias(db.conn(), &"anything".into()).unwrap();
        assert_eq!(resolved, CanonicalConceptId("anything".into()));
    }

    #[test]
    fn test_resolve_follows_exactly_one_hop() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        seed(&db, "A");
        seed_alias(&db, "B", "A");

        assert_eq!(
            resolve_alias(db.conn(), &"B".into()).unwrap(),
            CanonicalConceptId("A".into())
        );
        assert!(is_alias(db.conn(), &"B".into()).unwrap());
        assert!(!is_alias(db.conn(), &"A".into()).unwrap());
        assert_eq!(
            alias_ids_among(db.conn(), &["A".into(), "B".into()]).unwrap(),
            vec![ConceptId::from("B")]
        );
        assert_eq!(aliases_of(db.conn(), &"A".into()).unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_aliases_keeps_input_order() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        seed(&db, "A");
        seed(&db, "C");
        seed_alias(&db, "B", "A");
        seed_alias(&db, "D", "C");

        let resolved =
            resolve_aliases(db.conn(), &["D".into(), "A".into(), "B".into(), "X".into()]).unwrap();
        let resolved: Vec<&str> = resolved.iter().map(|id| id.0.as_str()).collect();
        assert_eq!(resolved, vec!["C", "A", "A", "X"]);
    }

    #[test]
    fn test_create_edge_resolved_rewrites_alias_endpoints() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        seed(&db, "A");
        seed(&db, "C");
        seed_alias(&db, "B", "A");

        let edge = create_edge_resolved(
            db.conn(),
            NewEdge {
                from_concept_id: "B".into(),
                to_concept_id: "C".into(),
                edge_type: EdgeType::UsedIn,
                source_url: None,
                confidence: None,
                verifier_score: None,
                evidence_chunk_ids: vec![ChunkId("chunk_2".into()), ChunkId("chunk_1".into())],
            },
        )
        .unwrap();

        assert_eq!(edge.from_concept_id, ConceptId::from("A"));
        let stored = db.get_edge(&edge.id).unwrap().unwrap();
        assert_eq!(stored, edge);
    }

    #[test]
    fn test_create_edge_resolved_rejects_self_reference() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        seed(&db, "A");
        seed_alias(&db, "B", "A");

        let err = create_edge_resolved(
            db.conn(),
            NewEdge {
                from_concept_id: "A".into(),
                to_concept_id: "B".into(),
                edge_type: EdgeType::PartOf,
                source_url: None,
                confidence: None,
                verifier_score: None,
                evidence_chunk_ids: Vec::new(),
            },
        )
        .unwrap_err();

        assert!(matches!(err, MergeError::SelfReference { ref id } if id.0 == "A"));
    }
}
