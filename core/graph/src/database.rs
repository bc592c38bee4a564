use anyhow::Result;
use concept_graph_schemas::{
    CanonicalConceptId, Concept, ConceptId, ConceptMerge, ConceptSource, Edge, EdgeId,
    MergeId, MergePreview, ReviewItem, ReviewItemId,
};
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use tracing::info;

use crate::error::MergeResult;
use crate::merge::MergeRequest;
use crate::{alias, apply, history, merge, store, undo};

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the graph database and make sure every table exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self { conn };
        db.init_schema()?;

        info!("Database initialized");
        Ok(db)
    }

    /// Borrow the underlying connection for direct use of the store primitives
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Create all tables and indexes
    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS concepts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                kind TEXT NOT NULL,
                l0_summary TEXT,
                l1_summary TEXT,
                l2_summary TEXT,
                module TEXT,
                note_source TEXT,
                context TEXT,
                mastery_score REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS edges (
                id TEXT PRIMARY KEY,
                from_concept_id TEXT NOT NULL,
                to_concept_id TEXT NOT NULL,
                edge_type TEXT NOT NULL,
                source_url TEXT,
                confidence REAL,
                verifier_score REAL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (from_concept_id) REFERENCES concepts(id) ON DELETE CASCADE,
                FOREIGN KEY (to_concept_id) REFERENCES concepts(id) ON DELETE CASCADE
            )",
            [],
        )?;

        // Evidence chunks live elsewhere; only the link is owned here
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS edge_evidence (
                edge_id TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                PRIMARY KEY (edge_id, chunk_id),
                FOREIGN KEY (edge_id) REFERENCES edges(id) ON DELETE CASCADE
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS review_items (
                id TEXT PRIMARY KEY,
                concept_id TEXT,
                prompt TEXT NOT NULL,
                answer TEXT NOT NULL,
                due_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (concept_id) REFERENCES concepts(id) ON DELETE SET NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS concept_sources (
                concept_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (concept_id, source_id),
                FOREIGN KEY (concept_id) REFERENCES concepts(id) ON DELETE CASCADE
            )",
            [],
        )?;

        // === MERGE TABLES ===

        // Audit + undo record, never deleted
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS concept_merge (
                id TEXT PRIMARY KEY,
                canonical_id TEXT NOT NULL,
                duplicate_ids TEXT NOT NULL,
                details TEXT NOT NULL,
                created_at TEXT NOT NULL,
                undone_at TEXT
            )",
            [],
        )?;

        // canonical_id has no foreign key: a canonical may itself be merged away later
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS concept_alias (
                alias_id TEXT PRIMARY KEY,
                canonical_id TEXT NOT NULL,
                merge_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (merge_id) REFERENCES concept_merge(id)
            )",
            [],
        )?;

        // Indexes for performance
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_concept_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_concept_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_review_items_concept ON review_items(concept_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_concept_alias_merge ON concept_alias(merge_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_concept_merge_created
             ON concept_merge(created_at DESC)",
            [],
        )?;

        Ok(())
    }

    // ========== ENTITY METHODS ==========

    pub fn insert_concept(&self, concept: &Concept) -> Result<()> {
        store::insert_concept(&self.conn, concept)?;
        Ok(())
    }

    pub fn get_concept(&self, id: &ConceptId) -> Result<Option<Concept>> {
        Ok(store::get_concept(&self.conn, id)?)
    }

    pub fn count_concepts(&self) -> Result<usize> {
        Ok(store::count_concepts(&self.conn)?)
    }

    pub fn insert_edge(&self, edge: &Edge) -> Result<()> {
        store::insert_edge(&self.conn, edge)?;
        Ok(())
    }

    pub fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        Ok(store::get_edge(&self.conn, id)?)
    }

    pub fn insert_review_item(&self, item: &ReviewItem) -> Result<()> {
        store::insert_review_item(&self.conn, item)?;
        Ok(())
    }

    pub fn get_review_item(&self, id: &ReviewItemId) -> Result<Option<ReviewItem>> {
        Ok(store::get_review_item(&self.conn, id)?)
    }

    /// Link a concept to a source; false when the link already existed
    pub fn add_concept_source(&self, link: &ConceptSource) -> Result<bool> {
        Ok(store::insert_concept_source(&self.conn, link)?)
    }

    pub fn concept_sources(&self, concept_id: &ConceptId) -> Result<Vec<ConceptSource>> {
        Ok(store::source_links_for(
            &self.conn,
            std::slice::from_ref(concept_id),
        )?)
    }

    // ========== MERGE METHODS ==========

    pub fn resolve_alias(&self, id: &ConceptId) -> MergeResult<CanonicalConceptId> {
        alias::resolve_alias(&self.conn, id)
    }

    /// Compute what a merge would do. Reads run inside one deferred
    /// transaction so the counts come from a single snapshot. Nothing is
    /// written, so a shared borrow is enough.
    pub fn preview_merge(
        &self,
        canonical_id: &ConceptId,
        duplicate_ids: &[ConceptId],
        edge_limit: Option<usize>,
    ) -> MergeResult<MergePreview> {
        let request = MergeRequest::new(canonical_id, duplicate_ids)?;
        let tx = self.conn.unchecked_transaction()?;
        let preview = merge::preview_merge(&tx, &request, edge_limit)?;
        tx.commit()?;
        Ok(preview)
    }

    /// Merge duplicates into the canonical concept in one transaction.
    /// Any error rolls every write back.
    pub fn apply_merge(
        &mut self,
        canonical_id: &ConceptId,
        duplicate_ids: &[ConceptId],
    ) -> MergeResult<ConceptMerge> {
        let request = MergeRequest::new(canonical_id, duplicate_ids)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let record = apply::apply_merge(&tx, &request)?;
        tx.commit()?;

        info!(
            "Merged {} concept(s) into {} ({})",
            record.duplicate_ids.len(),
            record.canonical_id,
            record.id
        );
        Ok(record)
    }

    /// Reverse a merge in one transaction
    pub fn undo_merge(&mut self, merge_id: &MergeId) -> MergeResult<ConceptMerge> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let record = undo::undo_merge(&tx, merge_id)?;
        tx.commit()?;

        info!("Undid merge {} into {}", record.id, record.canonical_id);
        Ok(record)
    }

    pub fn get_merge(&self, merge_id: &MergeId) -> MergeResult<Option<ConceptMerge>> {
        history::get_merge(&self.conn, merge_id)
    }

    pub fn list_merges(
        &self,
        concept_id: Option<&ConceptId>,
        limit: usize,
    ) -> MergeResult<Vec<ConceptMerge>> {
        history::list_merges(&self.conn, concept_id, limit)
    }
}
