//! Single-entity primitives over the concept graph tables.
//!
//! Every function takes an explicit `&Connection`; a `Transaction` derefs to
//! one, so the merge engine composes these inside its own transaction.

use concept_graph_schemas::{
    ChunkId, Concept, ConceptId, ConceptKind, ConceptSource, Edge, EdgeId, EdgeType, ReviewItem,
    ReviewItemId, SourceId,
};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::str::FromStr;
use tracing::debug;

const CONCEPT_COLUMNS: &str = "id, title, kind, l0_summary, l1_summary, l2_summary, module,
     note_source, context, mastery_score, created_at, updated_at";

const EDGE_COLUMNS: &str = "id, from_concept_id, to_concept_id, edge_type, source_url,
     confidence, verifier_score, created_at";

/// `?1, ?2, ..., ?n` for an `IN (...)` clause.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_column<T>(raw: String, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

// ========== CONCEPTS ==========

fn row_to_concept(row: &Row) -> rusqlite::Result<Concept> {
    let kind: ConceptKind = parse_column(row.get(2)?, 2)?;

    Ok(Concept {
        id: ConceptId(row.get(0)?),
        title: row.get(1)?,
        kind,
        l0_summary: row.get(3)?,
        l1_summary: row.get(4)?,
        l2_summary: row.get(5)?,
        module: row.get(6)?,
        note_source: row.get(7)?,
        context: row.get(8)?,
        mastery_score: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Insert a concept row verbatim, timestamps included.
pub fn insert_concept(conn: &Connection, concept: &Concept) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO concepts ({})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            CONCEPT_COLUMNS
        ),
        params![
            concept.id.0,
            concept.title,
            concept.kind.as_str(),
            concept.l0_summary,
            concept.l1_summary,
            concept.l2_summary,
            concept.module,
            concept.note_source,
            concept.context,
            concept.mastery_score,
            concept.created_at,
            concept.updated_at,
        ],
    )?;

    debug!("Inserted concept: {}", concept.id);
    Ok(())
}

pub fn get_concept(conn: &Connection, id: &ConceptId) -> rusqlite::Result<Option<Concept>> {
    conn.query_row(
        &format!("SELECT {} FROM concepts WHERE id = ?1", CONCEPT_COLUMNS),
        params![id.0],
        row_to_concept,
    )
    .optional()
}

/// Fetch every concept whose id is in `ids`, in the order of `ids`.
/// Missing ids are simply absent from the result.
pub fn get_concepts(conn: &Connection, ids: &[ConceptId]) -> rusqlite::Result<Vec<Concept>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM concepts WHERE id IN ({})",
        CONCEPT_COLUMNS,
        placeholders(ids.len())
    ))?;
    let mut concepts = stmt
        .query_map(params_from_iter(ids.iter().map(|id| id.0.as_str())), row_to_concept)?
        .collect::<Result<Vec<_>, _>>()?;

    concepts.sort_by_key(|concept| ids.iter().position(|id| *id == concept.id));
    Ok(concepts)
}

pub fn concept_exists(conn: &Connection, id: &ConceptId) -> rusqlite::Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM concepts WHERE id = ?1",
            params![id.0],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    Ok(exists)
}

pub fn delete_concept(conn: &Connection, id: &ConceptId) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM concepts WHERE id = ?1", params![id.0])
}

pub fn count_concepts(conn: &Connection) -> rusqlite::Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM concepts", [], |row| row.get(0))?;
    Ok(count as usize)
}

// ========== EDGES ==========

fn row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
    let edge_type: EdgeType = parse_column(row.get(3)?, 3)?;

    Ok(Edge {
        id: EdgeId(row.get(0)?),
        from_concept_id: ConceptId(row.get(1)?),
        to_concept_id: ConceptId(row.get(2)?),
        edge_type,
        source_url: row.get(4)?,
        confidence: row.get(5)?,
        verifier_score: row.get(6)?,
        created_at: row.get(7)?,
        evidence_chunk_ids: Vec::new(),
    })
}

fn load_evidence(conn: &Connection, edge: &mut Edge) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT chunk_id FROM edge_evidence WHERE edge_id = ?1 ORDER BY chunk_id",
    )?;
    edge.evidence_chunk_ids = stmt
        .query_map(params![edge.id.0], |row| Ok(ChunkId(row.get(0)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(())
}

/// Insert an edge and its evidence links. Endpoints are written as given;
/// callers that accept user ids go through `alias::create_edge_resolved`.
pub fn insert_edge(conn: &Connection, edge: &Edge) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO edges ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            EDGE_COLUMNS
        ),
        params![
            edge.id.0,
            edge.from_concept_id.0,
            edge.to_concept_id.0,
            edge.edge_type.as_str(),
            edge.source_url,
            edge.confidence,
            edge.verifier_score,
            edge.created_at,
        ],
    )?;

    for chunk_id in &edge.evidence_chunk_ids {
        insert_evidence_link(conn, &edge.id, chunk_id)?;
    }

    debug!(
        "Inserted edge: {} -{}-> {} ({})",
        edge.from_concept_id,
        edge.edge_type.as_str(),
        edge.to_concept_id,
        edge.id
    );
    Ok(())
}

pub fn insert_evidence_link(
    conn: &Connection,
    edge_id: &EdgeId,
    chunk_id: &ChunkId,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO edge_evidence (edge_id, chunk_id) VALUES (?1, ?2)",
        params![edge_id.0, chunk_id.0],
    )?;
    Ok(())
}

pub fn get_edge(conn: &Connection, id: &EdgeId) -> rusqlite::Result<Option<Edge>> {
    let edge = conn
        .query_row(
            &format!("SELECT {} FROM edges WHERE id = ?1", EDGE_COLUMNS),
            params![id.0],
            row_to_edge,
        )
        .optional()?;

    match edge {
        Some(mut edge) => {
            load_evidence(conn, &mut edge)?;
            Ok(Some(edge))
        }
        None => Ok(None),
    }
}

/// Every edge with either endpoint in `ids`, evidence included, ordered by
/// creation time then id.
pub fn edges_touching(conn: &Connection, ids: &[ConceptId]) -> rusqlite::Result<Vec<Edge>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let marks = placeholders(ids.len());
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM edges
         WHERE from_concept_id IN ({marks}) OR to_concept_id IN ({marks})
         ORDER BY created_at, id",
        EDGE_COLUMNS
    ))?;
    let mut edges = stmt
        .query_map(params_from_iter(ids.iter().map(|id| id.0.as_str())), row_to_edge)?
        .collect::<Result<Vec<_>, _>>()?;

    for edge in &mut edges {
        load_evidence(conn, edge)?;
    }
    Ok(edges)
}

pub fn update_edge_endpoints(
    conn: &Connection,
    id: &EdgeId,
    from: &ConceptId,
    to: &ConceptId,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE edges SET from_concept_id = ?1, to_concept_id = ?2 WHERE id = ?3",
        params![from.0, to.0, id.0],
    )
}

/// Delete an edge; its evidence links go with it via ON DELETE CASCADE.
pub fn delete_edge(conn: &Connection, id: &EdgeId) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM edges WHERE id = ?1", params![id.0])
}

// ========== REVIEW ITEMS ==========

fn row_to_review_item(row: &Row) -> rusqlite::Result<ReviewItem> {
    Ok(ReviewItem {
        id: ReviewItemId(row.get(0)?),
        concept_id: row.get::<_, Option<String>>(1)?.map(ConceptId),
        prompt: row.get(2)?,
        answer: row.get(3)?,
        due_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn insert_review_item(conn: &Connection, item: &ReviewItem) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO review_items (id, concept_id, prompt, answer, due_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            item.id.0,
            item.concept_id.as_ref().map(|id| id.0.as_str()),
            item.prompt,
            item.answer,
            item.due_at,
            item.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_review_item(
    conn: &Connection,
    id: &ReviewItemId,
) -> rusqlite::Result<Option<ReviewItem>> {
    conn.query_row(
        "SELECT id, concept_id, prompt, answer, due_at, created_at
         FROM review_items WHERE id = ?1",
        params![id.0],
        row_to_review_item,
    )
    .optional()
}

pub fn review_items_for(conn: &Connection, ids: &[ConceptId]) -> rusqlite::Result<Vec<ReviewItem>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT id, concept_id, prompt, answer, due_at, created_at
         FROM review_items
         WHERE concept_id IN ({})
         ORDER BY id",
        placeholders(ids.len())
    ))?;
    let items = stmt
        .query_map(
            params_from_iter(ids.iter().map(|id| id.0.as_str())),
            row_to_review_item,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn set_review_item_concept(
    conn: &Connection,
    id: &ReviewItemId,
    concept_id: Option<&ConceptId>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE review_items SET concept_id = ?1 WHERE id = ?2",
        params![concept_id.map(|c| c.0.as_str()), id.0],
    )
}

pub fn delete_review_item(conn: &Connection, id: &ReviewItemId) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM review_items WHERE id = ?1", params![id.0])
}

// ========== CONCEPT SOURCES ==========

fn row_to_concept_source(row: &Row) -> rusqlite::Result<ConceptSource> {
    Ok(ConceptSource {
        concept_id: ConceptId(row.get(0)?),
        source_id: SourceId(row.get(1)?),
        created_at: row.get(2)?,
    })
}

/// Link a concept to a source. Returns false when the pair already exists,
/// in which case nothing is written.
pub fn insert_concept_source(conn: &Connection, link: &ConceptSource) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO concept_sources (concept_id, source_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![link.concept_id.0, link.source_id.0, link.created_at],
    )?;
    Ok(inserted > 0)
}

pub fn source_links_for(
    conn: &Connection,
    ids: &[ConceptId],
) -> rusqlite::Result<Vec<ConceptSource>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT concept_id, source_id, created_at
         FROM concept_sources
         WHERE concept_id IN ({})
         ORDER BY concept_id, source_id",
        placeholders(ids.len())
    ))?;
    let links = stmt
        .query_map(
            params_from_iter(ids.iter().map(|id| id.0.as_str())),
            row_to_concept_source,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

/// Delete one exact link row, matched on timestamp as well as the pair.
pub fn delete_concept_source(conn: &Connection, link: &ConceptSource) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM concept_sources
         WHERE concept_id = ?1 AND source_id = ?2 AND created_at = ?3",
        params![link.concept_id.0, link.source_id.0, link.created_at],
    )
}

pub fn delete_source_links_for(conn: &Connection, ids: &[ConceptId]) -> rusqlite::Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    conn.execute(
        &format!(
            "DELETE FROM concept_sources WHERE concept_id IN ({})",
            placeholders(ids.len())
        ),
        params_from_iter(ids.iter().map(|id| id.0.as_str())),
    )
}
