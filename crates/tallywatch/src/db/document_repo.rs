//! Document repository: the `documents` and `document_content` tables.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_ts, get_parsed, get_ts, DatabaseError};
use crate::document::{Document, DocumentStatus};

fn from_row(row: &Row<'_>) -> Result<Document, rusqlite::Error> {
    Ok(Document {
        id: row.get("id")?,
        source_ref: row.get("source_ref")?,
        content_hash: row.get("content_hash")?,
        page_count: row.get("page_count")?,
        classification: get_parsed(row, "classification")?,
        format: get_parsed(row, "format")?,
        mime_type: row.get("mime_type")?,
        eligible_voters: row.get("eligible_voters")?,
        status: get_parsed(row, "status")?,
        status_reason: row.get("status_reason")?,
        submitted_at: get_ts(row, "submitted_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

/// Inserts the document row and its content.
pub fn insert(conn: &Connection, doc: &Document, content: &[u8]) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO documents (id, source_ref, content_hash, page_count, classification, format,
         mime_type, eligible_voters, status, status_reason, submitted_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            doc.id,
            doc.source_ref,
            doc.content_hash,
            doc.page_count,
            doc.classification.as_str(),
            doc.format.as_str(),
            doc.mime_type,
            doc.eligible_voters,
            doc.status.as_str(),
            doc.status_reason,
            format_ts(doc.submitted_at),
            format_ts(doc.updated_at),
        ],
    )?;
    conn.execute(
        "INSERT INTO document_content (document_id, content) VALUES (?1, ?2)",
        params![doc.id, content],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Document>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM documents WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?)
}

pub fn find_by_hash(conn: &Connection, hash: &str) -> Result<Option<Document>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM documents WHERE content_hash = ?1",
            params![hash],
            from_row,
        )
        .optional()?)
}

pub fn load_content(conn: &Connection, id: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT content FROM document_content WHERE document_id = ?1",
            params![id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Moves a document to `to` only if it is currently in one of `from`.
/// Returns whether the row changed; concurrent callers race on this.
pub fn transition(
    conn: &Connection,
    id: &str,
    from: &[DocumentStatus],
    to: DocumentStatus,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let Some(current) = find_by_id(conn, id)? else {
        return Ok(false);
    };
    if !from.contains(&current.status) {
        return Ok(false);
    }
    let changed = conn.execute(
        "UPDATE documents SET status = ?2, status_reason = ?3, updated_at = ?4
         WHERE id = ?1 AND status = ?5",
        params![
            id,
            to.as_str(),
            reason,
            format_ts(now),
            current.status.as_str()
        ],
    )?;
    Ok(changed == 1)
}

/// Documents sitting in one of `statuses` since before `cutoff`.
pub fn list_stale(
    conn: &Connection,
    statuses: &[DocumentStatus],
    cutoff: DateTime<Utc>,
) -> Result<Vec<Document>, DatabaseError> {
    let mut out = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT * FROM documents WHERE status = ?1 AND updated_at < ?2 ORDER BY updated_at",
    )?;
    let cutoff = format_ts(cutoff);
    for status in statuses {
        let rows = stmt
            .query_map(params![status.as_str(), cutoff], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        out.extend(rows);
    }
    Ok(out)
}

pub fn count_by_status(conn: &Connection) -> Result<BTreeMap<DocumentStatus, u64>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM documents GROUP BY status")?;
    let rows = stmt
        .query_map([], |r| Ok((get_parsed::<DocumentStatus>(r, "status")?, r.get::<_, u64>(1)?)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::document::{Classification, DocumentFormat};

    fn sample(id: &str, hash: &str) -> Document {
        let now = DateTime::parse_from_rfc3339("2026-03-08T16:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Document {
            id: id.to_string(),
            source_ref: format!("uploads/{id}.pdf"),
            content_hash: hash.to_string(),
            page_count: 2,
            classification: Classification::TallySheet,
            format: DocumentFormat::Pdf,
            mime_type: Some("application/pdf".to_string()),
            eligible_voters: Some(350),
            status: DocumentStatus::Queued,
            status_reason: None,
            submitted_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let doc = sample("d1", "hash-1");
        db.with_conn(|c| insert(c, &doc, b"%PDF-1.7")).unwrap();

        let found = db.with_conn(|c| find_by_id(c, "d1")).unwrap().unwrap();
        assert_eq!(found, doc);
        let by_hash = db.with_conn(|c| find_by_hash(c, "hash-1")).unwrap();
        assert_eq!(by_hash.map(|d| d.id), Some("d1".to_string()));
        let content = db.with_conn(|c| load_content(c, "d1")).unwrap().unwrap();
        assert_eq!(content, b"%PDF-1.7");
    }

    #[test]
    fn test_duplicate_hash_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|c| insert(c, &sample("d1", "same"), b"a"))
            .unwrap();
        assert!(db
            .with_conn(|c| insert(c, &sample("d2", "same"), b"a"))
            .is_err());
    }

    #[test]
    fn test_conditional_transition() {
        let db = Database::open_in_memory().unwrap();
        let doc = sample("d1", "h");
        db.with_conn(|c| insert(c, &doc, b"a")).unwrap();

        let now = doc.submitted_at;
        let moved = db
            .with_conn(|c| {
                transition(c, "d1", &[DocumentStatus::Queued], DocumentStatus::Processing, None, now)
            })
            .unwrap();
        assert!(moved);

        let again = db
            .with_conn(|c| {
                transition(c, "d1", &[DocumentStatus::Queued], DocumentStatus::Processing, None, now)
            })
            .unwrap();
        assert!(!again);
    }

    #[test]
    fn test_stale_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let doc = sample("d1", "h");
        db.with_conn(|c| insert(c, &doc, b"a")).unwrap();

        let later = doc.submitted_at + chrono::Duration::minutes(45);
        let stale = db
            .with_conn(|c| list_stale(c, &[DocumentStatus::Queued], later))
            .unwrap();
        assert_eq!(stale.len(), 1);

        let counts = db.with_conn(count_by_status).unwrap();
        assert_eq!(counts.get(&DocumentStatus::Queued), Some(&1));
    }
}
