//! Extracted fields, appended corrections, extracted pages and
//! cross-validation results.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_ts, get_json, get_parsed, get_ts, DatabaseError};
use crate::crossval::CrossValidationResult;
use crate::extract::{
    Alternative, CorrectionSource, ExtractedField, FieldCorrection, Mark, MarkMeaning,
};

fn field_from_row(row: &Row<'_>) -> Result<ExtractedField, rusqlite::Error> {
    let symbol: Option<String> = row.get("mark")?;
    let meaning: Option<String> = row.get("mark_meaning")?;
    let mark = symbol.map(|symbol| Mark {
        symbol,
        meaning: meaning
            .and_then(|m| m.parse().ok())
            .unwrap_or(MarkMeaning::Unrecognized),
    });
    let alternatives: Option<String> = row.get("alternatives")?;
    let alternatives: Vec<Alternative> = match alternatives {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(ExtractedField {
        id: row.get("id")?,
        document_id: row.get("document_id")?,
        key: row.get("field_key")?,
        page: row.get("page")?,
        raw_text: row.get("raw_text")?,
        value: row.get("value")?,
        mark,
        state: get_parsed(row, "state")?,
        confidence: row.get("confidence")?,
        needs_review: row.get("needs_review")?,
        alternatives,
        created_at: get_ts(row, "created_at")?,
    })
}

/// Inserts fields, skipping any `(document, page, key)` already stored.
/// Returns the number of new rows.
pub fn insert_fields(conn: &Connection, fields: &[ExtractedField]) -> Result<usize, DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO extracted_fields (id, document_id, field_key, page, raw_text,
         value, mark, mark_meaning, state, confidence, needs_review, alternatives, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    let mut inserted = 0;
    for f in fields {
        let alternatives = if f.alternatives.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&f.alternatives)?)
        };
        inserted += stmt.execute(params![
            f.id,
            f.document_id,
            f.key,
            f.page,
            f.raw_text,
            f.value,
            f.mark.as_ref().map(|m| m.symbol.as_str()),
            f.mark.as_ref().map(|m| m.meaning.as_str()),
            f.state.as_str(),
            f.confidence,
            f.needs_review,
            alternatives,
            format_ts(f.created_at),
        ])?;
    }
    Ok(inserted)
}

pub fn list_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<ExtractedField>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM extracted_fields WHERE document_id = ?1 ORDER BY page, field_key",
    )?;
    let rows = stmt
        .query_map(params![document_id], field_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<ExtractedField>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM extracted_fields WHERE id = ?1",
            params![id],
            field_from_row,
        )
        .optional()?)
}

pub fn find_by_key(
    conn: &Connection,
    document_id: &str,
    page: u32,
    key: &str,
) -> Result<Option<ExtractedField>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM extracted_fields WHERE document_id = ?1 AND page = ?2 AND field_key = ?3",
            params![document_id, page, key],
            field_from_row,
        )
        .optional()?)
}

// ─── Corrections ────────────────────────────────────────────────────────────

fn correction_from_row(row: &Row<'_>) -> Result<FieldCorrection, rusqlite::Error> {
    Ok(FieldCorrection {
        id: row.get("id")?,
        field_id: row.get("field_id")?,
        document_id: row.get("document_id")?,
        review_item_id: row.get("review_item_id")?,
        value: row.get("value")?,
        mark: row.get("mark")?,
        source: get_parsed::<CorrectionSource>(row, "source")?,
        actor: row.get("actor")?,
        note: row.get("note")?,
        created_at: get_ts(row, "created_at")?,
    })
}

pub fn insert_correction(conn: &Connection, c: &FieldCorrection) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO field_corrections (id, field_id, document_id, review_item_id, value, mark,
         source, actor, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            c.id,
            c.field_id,
            c.document_id,
            c.review_item_id,
            c.value,
            c.mark,
            c.source.as_str(),
            c.actor,
            c.note,
            format_ts(c.created_at),
        ],
    )?;
    Ok(())
}

/// Corrections for a document in append order.
pub fn corrections_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<FieldCorrection>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM field_corrections WHERE document_id = ?1 ORDER BY seq")?;
    let rows = stmt
        .query_map(params![document_id], correction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ─── Pages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub page: u32,
    pub provider: String,
    pub provider_confidence: f64,
    pub raw_code: Option<String>,
}

/// Records that a page's fields are stored. Idempotent.
pub fn mark_page_extracted(
    conn: &Connection,
    document_id: &str,
    page: &ExtractedPage,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO extracted_pages (document_id, page, provider, provider_confidence,
         raw_code, extracted_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            document_id,
            page.page,
            page.provider,
            page.provider_confidence,
            page.raw_code,
            format_ts(now)
        ],
    )?;
    Ok(())
}

pub fn extracted_pages(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<ExtractedPage>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT page, provider, provider_confidence, raw_code FROM extracted_pages
         WHERE document_id = ?1 ORDER BY page",
    )?;
    let rows = stmt
        .query_map(params![document_id], |r| {
            Ok(ExtractedPage {
                page: r.get(0)?,
                provider: r.get(1)?,
                provider_confidence: r.get(2)?,
                raw_code: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ─── Cross-validation ───────────────────────────────────────────────────────

pub fn save_cross_validation(
    conn: &Connection,
    document_id: &str,
    result: &CrossValidationResult,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO cross_validations (document_id, parse_status, match_status,
         canonical_table_id, confidence, result, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            document_id,
            result.decoded.parse_status.as_str(),
            result.match_status.as_str(),
            result.canonical_table_id,
            result.confidence,
            serde_json::to_string(result)?,
            format_ts(now),
        ],
    )?;
    Ok(())
}

pub fn load_cross_validation(
    conn: &Connection,
    document_id: &str,
) -> Result<Option<CrossValidationResult>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT result FROM cross_validations WHERE document_id = ?1",
            params![document_id],
            |r| get_json(r, "result"),
        )
        .optional()?)
}
