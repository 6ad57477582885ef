//! Validation findings. Rows are written once and never updated.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{format_ts, get_json, get_parsed, get_ts, DatabaseError};
use crate::validation::{RuleId, ValidationFinding};

fn from_row(row: &Row<'_>) -> Result<ValidationFinding, rusqlite::Error> {
    Ok(ValidationFinding {
        id: row.get("id")?,
        document_id: row.get("document_id")?,
        table_id: row.get("table_id")?,
        rule_id: get_parsed(row, "rule_id")?,
        passed: row.get("passed")?,
        severity: get_parsed(row, "severity")?,
        message: row.get("message")?,
        details: get_json(row, "details")?,
        field_keys: get_json(row, "field_keys")?,
        created_at: get_ts(row, "created_at")?,
    })
}

pub fn insert_findings(
    conn: &Connection,
    findings: &[ValidationFinding],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO findings (id, document_id, table_id, rule_id, passed, severity, message,
         details, field_keys, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for f in findings {
        stmt.execute(params![
            f.id,
            f.document_id,
            f.table_id,
            f.rule_id.as_str(),
            f.passed,
            f.severity.as_str(),
            f.message,
            serde_json::to_string(&f.details)?,
            serde_json::to_string(&f.field_keys)?,
            format_ts(f.created_at),
        ])?;
    }
    Ok(())
}

pub fn list_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<ValidationFinding>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM findings WHERE document_id = ?1 ORDER BY created_at, rule_id, id",
    )?;
    let rows = stmt
        .query_map(params![document_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn has_findings(conn: &Connection, document_id: &str) -> Result<bool, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM findings WHERE document_id = ?1",
        params![document_id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Failed findings of `rule` recorded at or after `since`.
pub fn failures_since(
    conn: &Connection,
    rule: RuleId,
    since: DateTime<Utc>,
) -> Result<Vec<ValidationFinding>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM findings WHERE rule_id = ?1 AND passed = 0 AND created_at >= ?2
         ORDER BY created_at",
    )?;
    let rows = stmt
        .query_map(params![rule.as_str(), format_ts(since)], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
