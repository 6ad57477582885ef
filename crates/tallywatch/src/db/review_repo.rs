//! Review items. Ordering lives in SQL: `priority_rank` then `seq`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_ts, get_json, get_parsed, get_ts, get_ts_opt, DatabaseError};
use crate::review::item::{NewReviewItem, ReviewItem, ReviewStats, ReviewStatus};

fn from_row(row: &Row<'_>) -> Result<ReviewItem, rusqlite::Error> {
    Ok(ReviewItem {
        id: row.get("id")?,
        seq: row.get("seq")?,
        document_id: row.get("document_id")?,
        priority: get_parsed(row, "priority")?,
        reason: get_parsed(row, "reason")?,
        status: get_parsed(row, "status")?,
        assignee: row.get("assignee")?,
        claimed_at: get_ts_opt(row, "claimed_at")?,
        sub_items: get_json(row, "sub_items")?,
        resolution_note: row.get("resolution_note")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

pub fn insert(
    conn: &Connection,
    id: &str,
    item: &NewReviewItem,
    now: DateTime<Utc>,
) -> Result<ReviewItem, DatabaseError> {
    conn.execute(
        "INSERT INTO review_items (id, document_id, priority, priority_rank, reason, status,
         sub_items, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?7)",
        params![
            id,
            item.document_id,
            item.priority.as_str(),
            item.priority.rank(),
            item.reason.as_str(),
            serde_json::to_string(&item.sub_items)?,
            format_ts(now),
        ],
    )?;
    find_by_id(conn, id)?.ok_or_else(|| DatabaseError::InvalidValue {
        column: "id",
        value: id.to_string(),
    })
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<ReviewItem>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM review_items WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?)
}

/// The item `get_next` would hand out: the first pending item, or an
/// in-progress item whose claim was taken before `claim_cutoff`.
pub fn next_claimable(
    conn: &Connection,
    claim_cutoff: DateTime<Utc>,
) -> Result<Option<ReviewItem>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM review_items
             WHERE status = 'pending' OR (status = 'in_progress' AND claimed_at < ?1)
             ORDER BY priority_rank, seq LIMIT 1",
            params![format_ts(claim_cutoff)],
            from_row,
        )
        .optional()?)
}

pub fn claim(
    conn: &Connection,
    id: &str,
    assignee: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE review_items SET status = 'in_progress', assignee = ?2, claimed_at = ?3,
         updated_at = ?3 WHERE id = ?1",
        params![id, assignee, format_ts(now)],
    )?;
    Ok(())
}

pub fn release(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE review_items SET status = 'pending', assignee = NULL, claimed_at = NULL,
         updated_at = ?2 WHERE id = ?1",
        params![id, format_ts(now)],
    )?;
    Ok(())
}

pub fn finish(
    conn: &Connection,
    id: &str,
    status: ReviewStatus,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE review_items SET status = ?2, resolution_note = ?3, updated_at = ?4 WHERE id = ?1",
        params![id, status.as_str(), note, format_ts(now)],
    )?;
    Ok(())
}

/// Items for a document that are not completed or rejected.
pub fn open_count_for_document(conn: &Connection, document_id: &str) -> Result<u64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM review_items
         WHERE document_id = ?1 AND status IN ('pending', 'in_progress')",
        params![document_id],
        |r| r.get(0),
    )?)
}

pub fn list_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<ReviewItem>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM review_items WHERE document_id = ?1 ORDER BY seq")?;
    let rows = stmt
        .query_map(params![document_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn stats(conn: &Connection) -> Result<ReviewStats, DatabaseError> {
    let mut stats = ReviewStats::default();

    let mut stmt = conn.prepare("SELECT status, COUNT(*) AS n FROM review_items GROUP BY status")?;
    let by_status = stmt
        .query_map([], |r| {
            Ok((get_parsed::<ReviewStatus>(r, "status")?, r.get::<_, u64>("n")?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (status, n) in by_status {
        match status {
            ReviewStatus::Pending => stats.pending = n,
            ReviewStatus::InProgress => stats.in_progress = n,
            ReviewStatus::Completed => stats.completed = n,
            ReviewStatus::Rejected => stats.rejected = n,
        }
    }

    let mut stmt = conn.prepare(
        "SELECT priority, COUNT(*) AS n FROM review_items WHERE status = 'pending' GROUP BY priority",
    )?;
    stats.pending_by_priority = stmt
        .query_map([], |r| Ok((get_parsed(r, "priority")?, r.get::<_, u64>("n")?)))?
        .collect::<Result<_, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT reason, COUNT(*) AS n FROM review_items WHERE status = 'pending' GROUP BY reason",
    )?;
    stats.pending_by_reason = stmt
        .query_map([], |r| Ok((get_parsed(r, "reason")?, r.get::<_, u64>("n")?)))?
        .collect::<Result<_, _>>()?;

    Ok(stats)
}
