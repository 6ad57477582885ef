//! Append-only audit trail for incidents, review items and documents.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{format_ts, get_ts, DatabaseError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub seq: i64,
    pub entity: String,
    pub entity_id: String,
    pub actor: String,
    pub action: String,
    pub from_state: Option<String>,
    pub to_state: Option<String>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// An entry about to be written.
#[derive(Debug, Clone)]
pub struct NewAuditEntry<'a> {
    pub entity: &'a str,
    pub entity_id: &'a str,
    pub actor: &'a str,
    pub action: &'a str,
    pub from_state: Option<&'a str>,
    pub to_state: Option<&'a str>,
    pub detail: Option<&'a str>,
}

fn from_row(row: &Row<'_>) -> Result<AuditEntry, rusqlite::Error> {
    Ok(AuditEntry {
        seq: row.get("seq")?,
        entity: row.get("entity")?,
        entity_id: row.get("entity_id")?,
        actor: row.get("actor")?,
        action: row.get("action")?,
        from_state: row.get("from_state")?,
        to_state: row.get("to_state")?,
        detail: row.get("detail")?,
        at: get_ts(row, "at")?,
    })
}

pub fn record(
    conn: &Connection,
    entry: &NewAuditEntry<'_>,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO audit_log (entity, entity_id, actor, action, from_state, to_state, detail, at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.entity,
            entry.entity_id,
            entry.actor,
            entry.action,
            entry.from_state,
            entry.to_state,
            entry.detail,
            format_ts(at),
        ],
    )?;
    Ok(())
}

pub fn list_for(
    conn: &Connection,
    entity: &str,
    entity_id: &str,
) -> Result<Vec<AuditEntry>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM audit_log WHERE entity = ?1 AND entity_id = ?2 ORDER BY seq")?;
    let rows = stmt
        .query_map(params![entity, entity_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
