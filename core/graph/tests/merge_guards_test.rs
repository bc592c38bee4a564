use concept_graph_schemas::{
    ChunkId, Concept, ConceptId, ConceptKind, Edge, EdgeId, EdgeType, MergeId, ReviewItem,
    ReviewItemId,
};
use concept_graph_store::{store, Database, MergeError};
use tempfile::TempDir;

fn open_db(temp_dir: &TempDir) -> Database {
    Database::new(temp_dir.path().join("graph.db")).unwrap()
}

fn concept(id: &str) -> Concept {
    Concept {
        id: id.into(),
        title: format!("Title of {}", id),
        kind: ConceptKind::Skill,
        l0_summary: None,
        l1_summary: None,
        l2_summary: None,
        module: None,
        note_source: None,
        context: None,
        mastery_score: 0.0,
        created_at: "2025-05-01T00:00:00+00:00".to_string(),
        updated_at: "2025-05-01T00:00:00+00:00".to_string(),
    }
}

fn edge(id: &str, from: &str, to: &str) -> Edge {
    Edge {
        id: EdgeId(id.to_string()),
        from_concept_id: from.into(),
        to_concept_id: to.into(),
        edge_type: EdgeType::RelatedTo,
        source_url: None,
        confidence: None,
        verifier_score: None,
        created_at: "2025-05-02T00:00:00+00:00".to_string(),
        evidence_chunk_ids: vec![ChunkId("chunk_1".to_string())],
    }
}

fn review_item(id: &str, concept_id: &str) -> ReviewItem {
    ReviewItem {
        id: ReviewItemId(id.to_string()),
        concept_id: Some(concept_id.into()),
        prompt: format!("Recall {}", concept_id),
        answer: "...".to_string(),
        due_at: None,
        created_at: "2025-05-03T00:00:00+00:00".to_string(),
    }
}

fn ids(raw: &[&str]) -> Vec<ConceptId> {
    raw.iter().map(|id| ConceptId::from(*id)).collect()
}

fn merge_count(db: &Database) -> usize {
    db.list_merges(None, 100).unwrap().len()
}

#[test]
fn test_missing_concepts_are_named() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    db.insert_concept(&concept("A")).unwrap();
    db.insert_concept(&concept("B")).unwrap();

    let err = db
        .preview_merge(&"A".into(), &ids(&["B", "X", "Y"]), None)
        .unwrap_err();
    match err {
        MergeError::NotFound { entity, ids } => {
            assert_eq!(entity, "concept");
            assert_eq!(ids, vec!["X".to_string(), "Y".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = db.apply_merge(&"Z".into(), &ids(&["B"])).unwrap_err();
    assert!(matches!(err, MergeError::NotFound { ref ids, .. } if ids == &vec!["Z".to_string()]));
    assert_eq!(merge_count(&db), 0);
    assert!(db.get_concept(&"B".into()).unwrap().is_some());
}

#[test]
fn test_only_canonical_is_empty_input() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    db.insert_concept(&concept("A")).unwrap();

    let err = db.apply_merge(&"A".into(), &ids(&["A"])).unwrap_err();
    assert!(matches!(err, MergeError::EmptyInput));
    let err = db.preview_merge(&"A".into(), &[], None).unwrap_err();
    assert!(matches!(err, MergeError::EmptyInput));
}

#[test]
fn test_alias_guard_rejects_merged_duplicates() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    for id in ["A", "B", "C"] {
        db.insert_concept(&concept(id)).unwrap();
    }
    db.insert_edge(&edge("e1", "C", "A")).unwrap();

    db.apply_merge(&"A".into(), &ids(&["B"])).unwrap();
    let edges_before = store::edges_touching(db.conn(), &ids(&["A", "C"])).unwrap();

    let err = db.preview_merge(&"C".into(), &ids(&["B"]), None).unwrap_err();
    assert!(matches!(err, MergeError::AlreadyAlias { ref ids } if ids == &vec!["B".to_string()]));

    let err = db.apply_merge(&"C".into(), &ids(&["B"])).unwrap_err();
    assert!(matches!(err, MergeError::AlreadyAlias { .. }));

    // Merging into an alias is rejected as well, even once a new concept
    // has taken the alias id
    db.insert_concept(&concept("B")).unwrap();
    let err = db.apply_merge(&"B".into(), &ids(&["C"])).unwrap_err();
    assert!(matches!(err, MergeError::AlreadyAlias { ref ids } if ids == &vec!["B".to_string()]));

    assert_eq!(merge_count(&db), 1);
    assert!(db.get_concept(&"C".into()).unwrap().is_some());
    assert_eq!(
        store::edges_touching(db.conn(), &ids(&["A", "C"])).unwrap(),
        edges_before
    );
}

#[test]
fn test_undo_guard_rejects_second_undo() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    for id in ["A", "B", "C"] {
        db.insert_concept(&concept(id)).unwrap();
    }
    db.insert_edge(&edge("e1", "B", "C")).unwrap();

    let record = db.apply_merge(&"A".into(), &ids(&["B"])).unwrap();
    let first = db.undo_merge(&record.id).unwrap();

    let err = db.undo_merge(&record.id).unwrap_err();
    match err {
        MergeError::AlreadyUndone { merge_id, undone_at } => {
            assert_eq!(merge_id, record.id);
            assert_eq!(Some(undone_at), first.undone_at);
        }
        other => panic!("unexpected error: {other}"),
    }

    let stored = db.get_merge(&record.id).unwrap().unwrap();
    assert_eq!(stored.undone_at, first.undone_at);
    assert_eq!(
        db.get_edge(&EdgeId("e1".into())).unwrap().unwrap().from_concept_id,
        ConceptId::from("B")
    );
}

#[test]
fn test_undo_unknown_merge_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);

    let err = db.undo_merge(&MergeId("merge_missing".into())).unwrap_err();
    assert!(matches!(err, MergeError::NotFound { entity: "merge", .. }));
}

#[test]
fn test_undo_refuses_id_collision() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    for id in ["A", "B", "C"] {
        db.insert_concept(&concept(id)).unwrap();
    }
    db.insert_edge(&edge("e1", "B", "C")).unwrap();

    let record = db.apply_merge(&"A".into(), &ids(&["B"])).unwrap();

    // An unrelated concept reuses the consumed id
    let mut squatter = concept("B");
    squatter.title = "Something else entirely".to_string();
    db.insert_concept(&squatter).unwrap();

    let err = db.undo_merge(&record.id).unwrap_err();
    assert!(matches!(err, MergeError::IdCollision { ref ids } if ids == &vec!["B".to_string()]));

    // Merged state is intact and the merge is still undoable later
    assert_eq!(
        db.get_concept(&"B".into()).unwrap().unwrap().title,
        "Something else entirely"
    );
    assert_eq!(
        db.get_edge(&EdgeId("e1".into())).unwrap().unwrap().from_concept_id,
        ConceptId::from("A")
    );
    assert!(db.get_merge(&record.id).unwrap().unwrap().undone_at.is_none());
    assert_eq!(db.resolve_alias(&"B".into()).unwrap().0, "A");
}

#[test]
fn test_undo_rejects_corrupt_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    for id in ["A", "B"] {
        db.insert_concept(&concept(id)).unwrap();
    }

    let record = db.apply_merge(&"A".into(), &ids(&["B"])).unwrap();
    db.conn()
        .execute(
            "UPDATE concept_merge SET details = '{\"legacy\": true}' WHERE id = ?1",
            [&record.id.0],
        )
        .unwrap();

    let err = db.undo_merge(&record.id).unwrap_err();
    assert!(matches!(err, MergeError::InvalidSnapshot { .. }));
    assert!(db.get_concept(&"B".into()).unwrap().is_none());
    assert_eq!(db.resolve_alias(&"B".into()).unwrap().0, "A");
}

#[test]
fn test_undo_rejects_future_snapshot_version() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    for id in ["A", "B"] {
        db.insert_concept(&concept(id)).unwrap();
    }

    let record = db.apply_merge(&"A".into(), &ids(&["B"])).unwrap();
    db.conn()
        .execute(
            "UPDATE concept_merge SET details = json_set(details, '$.version', 99) WHERE id = ?1",
            [&record.id.0],
        )
        .unwrap();

    let err = db.undo_merge(&record.id).unwrap_err();
    assert!(matches!(
        err,
        MergeError::InvalidSnapshot { ref reason, .. } if reason.contains("v99")
    ));
}

#[test]
fn test_undo_skips_rows_deleted_after_merge() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    for id in ["A", "B", "C"] {
        db.insert_concept(&concept(id)).unwrap();
    }
    db.insert_edge(&edge("e1", "B", "C")).unwrap();
    db.insert_review_item(&review_item("r1", "B")).unwrap();

    let record = db.apply_merge(&"A".into(), &ids(&["B"])).unwrap();
    assert_eq!(record.details.rewired_edges.len(), 1);
    assert_eq!(record.details.review_items.len(), 1);

    store::delete_edge(db.conn(), &EdgeId("e1".into())).unwrap();
    store::delete_review_item(db.conn(), &ReviewItemId("r1".into())).unwrap();

    let undone = db.undo_merge(&record.id).unwrap();
    assert!(undone.undone_at.is_some());
    assert!(db.get_concept(&"B".into()).unwrap().is_some());
    assert!(db.get_edge(&EdgeId("e1".into())).unwrap().is_none());
    assert!(db.get_review_item(&ReviewItemId("r1".into())).unwrap().is_none());
    assert_eq!(db.resolve_alias(&"B".into()).unwrap().0, "B");
}

#[test]
fn test_undo_aborts_when_deleted_edge_endpoint_is_gone() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    for id in ["A", "B", "C"] {
        db.insert_concept(&concept(id)).unwrap();
    }
    // A->B collapses to a self-loop and is deleted by the merge
    db.insert_edge(&edge("e_ab", "A", "B")).unwrap();
    db.insert_edge(&edge("e_bc", "B", "C")).unwrap();

    let record = db.apply_merge(&"A".into(), &ids(&["B"])).unwrap();
    assert_eq!(record.details.deleted_edges.len(), 1);

    // The canonical disappears, so e_ab cannot be put back
    store::delete_concept(db.conn(), &"A".into()).unwrap();

    let err = db.undo_merge(&record.id).unwrap_err();
    assert!(matches!(err, MergeError::Storage(_)));

    assert!(db.get_merge(&record.id).unwrap().unwrap().undone_at.is_none());
    assert!(db.get_concept(&"B".into()).unwrap().is_none());
    assert!(db.get_edge(&EdgeId("e_ab".into())).unwrap().is_none());
    assert_eq!(db.resolve_alias(&"B".into()).unwrap().0, "A");
}

#[test]
fn test_canonical_may_later_become_a_duplicate() {
    let temp_dir = TempDir::new().unwrap();
    let mut db = open_db(&temp_dir);
    for id in ["A", "B", "Z"] {
        db.insert_concept(&concept(id)).unwrap();
    }

    db.apply_merge(&"A".into(), &ids(&["B"])).unwrap();
    db.apply_merge(&"Z".into(), &ids(&["A"])).unwrap();

    // B still forwards one hop to the now-consumed A
    assert_eq!(db.resolve_alias(&"B".into()).unwrap().0, "A");
    assert_eq!(db.resolve_alias(&"A".into()).unwrap().0, "Z");
}
