use concept_graph_schemas::{ConceptId, ConceptMerge, MergeDetails, MergeId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use crate::error::{MergeError, MergeResult};

/// A `concept_merge` row with its snapshot still encoded. Undo inspects the
/// raw payload itself so a corrupt snapshot surfaces as `InvalidSnapshot`.
#[derive(Debug, Clone)]
pub(crate) struct MergeRow {
    pub id: MergeId,
    pub canonical_id: ConceptId,
    pub duplicate_ids_json: String,
    pub details_json: String,
    pub created_at: String,
    pub undone_at: Option<String>,
}

impl MergeRow {
    pub fn duplicate_ids(&self) -> MergeResult<Vec<ConceptId>> {
        serde_json::from_str(&self.duplicate_ids_json).map_err(|err| MergeError::InvalidSnapshot {
            merge_id: self.id.clone(),
            reason: format!("duplicate id list is not decodable: {}", err),
        })
    }

    pub fn details(&self) -> MergeResult<MergeDetails> {
        let details: MergeDetails =
            serde_json::from_str(&self.details_json).map_err(|err| MergeError::InvalidSnapshot {
                merge_id: self.id.clone(),
                reason: format!("details payload is not decodable: {}", err),
            })?;

        if !details.is_current_format() {
            return Err(MergeError::InvalidSnapshot {
                merge_id: self.id.clone(),
                reason: format!(
                    "unsupported snapshot format {} v{}",
                    details.format, details.version
                ),
            });
        }
        Ok(details)
    }

    pub fn into_merge(self) -> MergeResult<ConceptMerge> {
        let duplicate_ids = self.duplicate_ids()?;
        let details = self.details()?;
        Ok(ConceptMerge {
            id: self.id,
            canonical_id: self.canonical_id,
            duplicate_ids,
            details,
            created_at: self.created_at,
            undone_at: self.undone_at,
        })
    }
}

fn row_to_merge_row(row: &Row) -> rusqlite::Result<MergeRow> {
    Ok(MergeRow {
        id: MergeId(row.get(0)?),
        canonical_id: ConceptId(row.get(1)?),
        duplicate_ids_json: row.get(2)?,
        details_json: row.get(3)?,
        created_at: row.get(4)?,
        undone_at: row.get(5)?,
    })
}

pub(crate) fn load_merge_row(
    conn: &Connection,
    merge_id: &MergeId,
) -> MergeResult<Option<MergeRow>> {
    let row = conn
        .query_row(
            "SELECT id, canonical_id, duplicate_ids, details, created_at, undone_at
             FROM concept_merge WHERE id = ?1",
            params![merge_id.0],
            row_to_merge_row,
        )
        .optional()?;
    Ok(row)
}

/// Insert the audit row for a merge, snapshot included
pub(crate) fn insert_merge_record(conn: &Connection, merge: &ConceptMerge) -> MergeResult<()> {
    conn.execute(
        "INSERT INTO concept_merge (id, canonical_id, duplicate_ids, details, created_at, undone_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            merge.id.0,
            merge.canonical_id.0,
            serde_json::to_string(&merge.duplicate_ids)?,
            serde_json::to_string(&merge.details)?,
            merge.created_at,
            merge.undone_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn write_details(
    conn: &Connection,
    merge_id: &MergeId,
    details: &MergeDetails,
) -> MergeResult<()> {
    conn.execute(
        "UPDATE concept_merge SET details = ?1 WHERE id = ?2",
        params![serde_json::to_string(details)?, merge_id.0],
    )?;
    Ok(())
}

pub(crate) fn mark_undone(
    conn: &Connection,
    merge_id: &MergeId,
    undone_at: &str,
) -> MergeResult<()> {
    conn.execute(
        "UPDATE concept_merge SET undone_at = ?1 WHERE id = ?2 AND undone_at IS NULL",
        params![undone_at, merge_id.0],
    )?;
    Ok(())
}

/// Fetch one merge record with its decoded snapshot. A record whose snapshot
/// cannot be decoded is reported as `InvalidSnapshot` with the reason.
pub fn get_merge(conn: &Connection, merge_id: &MergeId) -> MergeResult<Option<ConceptMerge>> {
    load_merge_row(conn, merge_id)?
        .map(MergeRow::into_merge)
        .transpose()
}

/// Merge records newest first, optionally only those that involved
/// `concept_id` as canonical or as one of the duplicates.
///
/// Records with an undecodable snapshot are left out of the listing and
/// logged; `get_merge` on their id reports why.
pub fn list_merges(
    conn: &Connection,
    concept_id: Option<&ConceptId>,
    limit: usize,
) -> MergeResult<Vec<ConceptMerge>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.canonical_id, m.duplicate_ids, m.details, m.created_at, m.undone_at
         FROM concept_merge m
         WHERE ?1 IS NULL
            OR m.canonical_id = ?1
            OR EXISTS (SELECT 1 FROM json_each(m.duplicate_ids) d WHERE d.value = ?1)
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(
            params![concept_id.map(|id| id.0.as_str()), limit as i64],
            row_to_merge_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let merges = rows
        .into_iter()
        .filter_map(|row| {
            let merge_id = row.id.clone();
            match row.into_merge() {
                Ok(merge) => Some(merge),
                Err(err) => {
                    warn!("Skipping merge {} in history: {}", merge_id, err);
                    None
                }
            }
        })
        .collect();
    Ok(merges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use tempfile::NamedTempFile;

    fn record(id: &str, canonical: &str, duplicates: &[&str], created_at: &str) -> ConceptMerge {
        ConceptMerge {
            id: MergeId(id.to_string()),
            canonical_id: canonical.into(),
            duplicate_ids: duplicates.iter().map(|d| ConceptId::from(*d)).collect(),
            details: MergeDetails::empty(),
            created_at: created_at.to_string(),
            undone_at: None,
        }
    }

    #[test]
    fn test_list_merges_filters_by_participant() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let first = record("merge_1", "A", &["B"], "2025-01-01T00:00:00+00:00");
        let second = record("merge_2", "C", &["D", "E"], "2025-01-02T00:00:00+00:00");
        insert_merge_record(db.conn(), &first).unwrap();
        insert_merge_record(db.conn(), &second).unwrap();

        let all = list_merges(db.conn(), None, 10).unwrap();
        assert_eq!(all, vec![second.clone(), first.clone()]);

        let by_duplicate = list_merges(db.conn(), Some(&"E".into()), 10).unwrap();
        assert_eq!(by_duplicate, vec![second]);

        let by_canonical = list_merges(db.conn(), Some(&"A".into()), 10).unwrap();
        assert_eq!(by_canonical, vec![first]);

        assert_eq!(list_merges(db.conn(), None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_snapshot_version_is_invalid() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let mut merge = record("merge_old", "A", &["B"], "2025-01-01T00:00:00+00:00");
        merge.details.version = 0;
        insert_merge_record(db.conn(), &merge).unwrap();

        let err = get_merge(db.conn(), &merge.id).unwrap_err();
        assert!(matches!(err, MergeError::InvalidSnapshot { .. }));
    }

    #[test]
    fn test_list_merges_skips_undecodable_snapshots() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();

        let good = record("merge_good", "A", &["B"], "2025-01-01T00:00:00+00:00");
        let mut stale = record("merge_stale", "A", &["C"], "2025-01-02T00:00:00+00:00");
        stale.details.version = 0;
        insert_merge_record(db.conn(), &good).unwrap();
        insert_merge_record(db.conn(), &stale).unwrap();

        assert_eq!(list_merges(db.conn(), None, 10).unwrap(), vec![good.clone()]);
        assert_eq!(
            list_merges(db.conn(), Some(&"A".into()), 10).unwrap(),
            vec![good]
        );
    }
}
