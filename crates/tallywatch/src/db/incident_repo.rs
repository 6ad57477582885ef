use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_ts, get_json, get_parsed, get_ts, get_ts_opt, DatabaseError};
use crate::incident::{
    Incident, IncidentFilter, IncidentStatus, IncidentType, PageRequest,
};
use crate::validation::Severity;

const OPEN_CLAUSE: &str = "status NOT IN ('resolved', 'false_positive')";

fn from_row(row: &Row<'_>) -> Result<Incident, rusqlite::Error> {
    Ok(Incident {
        id: row.get("id")?,
        incident_type: get_parsed(row, "incident_type")?,
        severity: get_parsed(row, "severity")?,
        table_id: row.get("table_id")?,
        description: row.get("description")?,
        evidence: get_json(row, "evidence")?,
        status: get_parsed(row, "status")?,
        source: get_parsed(row, "source")?,
        document_id: row.get("document_id")?,
        assignee: row.get("assignee")?,
        resolution: row.get("resolution")?,
        escalated: row.get("escalated")?,
        escalated_at: get_ts_opt(row, "escalated_at")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
        sla_deadline: get_ts(row, "sla_deadline")?,
        closed_at: get_ts_opt(row, "closed_at")?,
    })
}

pub fn insert(conn: &Connection, incident: &Incident) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO incidents (id, incident_type, severity, table_id, description, evidence,
         status, source, document_id, assignee, resolution, escalated, escalated_at,
         created_at, updated_at, sla_deadline, closed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            incident.id,
            incident.incident_type.as_str(),
            incident.severity.as_str(),
            incident.table_id,
            incident.description,
            serde_json::to_string(&incident.evidence)?,
            incident.status.as_str(),
            incident.source.as_str(),
            incident.document_id,
            incident.assignee,
            incident.resolution,
            incident.escalated,
            incident.escalated_at.map(format_ts),
            format_ts(incident.created_at),
            format_ts(incident.updated_at),
            format_ts(incident.sla_deadline),
            incident.closed_at.map(format_ts),
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Incident>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM incidents WHERE id = ?1", params![id], from_row)
        .optional()?)
}

pub fn find_open_by_signature(
    conn: &Connection,
    incident_type: IncidentType,
    table_id: &str,
    description: &str,
) -> Result<Option<Incident>, DatabaseError> {
    let sql = format!(
        "SELECT * FROM incidents
         WHERE incident_type = ?1 AND table_id = ?2 AND description = ?3 AND {OPEN_CLAUSE}"
    );
    Ok(conn
        .query_row(
            &sql,
            params![incident_type.as_str(), table_id, description],
            from_row,
        )
        .optional()?)
}

/// Writes the mutable columns back. Type, table, description, evidence
/// and the deadline never change after creation.
pub fn update(conn: &Connection, incident: &Incident) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE incidents SET status = ?2, assignee = ?3, resolution = ?4, escalated = ?5,
         escalated_at = ?6, updated_at = ?7, closed_at = ?8
         WHERE id = ?1",
        params![
            incident.id,
            incident.status.as_str(),
            incident.assignee,
            incident.resolution,
            incident.escalated,
            incident.escalated_at.map(format_ts),
            format_ts(incident.updated_at),
            incident.closed_at.map(format_ts),
        ],
    )?;
    Ok(())
}

/// Aggregates over the filtered set, independent of paging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncidentCounts {
    pub total: u64,
    pub open: u64,
    pub critical: u64,
    pub high: u64,
}

pub fn list(
    conn: &Connection,
    filter: &IncidentFilter,
    page: PageRequest,
) -> Result<(Vec<Incident>, IncidentCounts), DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.as_str()));
    }
    if let Some(incident_type) = filter.incident_type {
        conditions.push(format!("incident_type = ?{}", param_values.len() + 1));
        param_values.push(Box::new(incident_type.as_str()));
    }
    if let Some(severity) = filter.severity {
        conditions.push(format!("severity = ?{}", param_values.len() + 1));
        param_values.push(Box::new(severity.as_str()));
    }
    if let Some(table_id) = &filter.table_id {
        conditions.push(format!("table_id = ?{}", param_values.len() + 1));
        param_values.push(Box::new(table_id.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();

    let counts_sql = format!(
        "SELECT COUNT(*),
         COALESCE(SUM(CASE WHEN {OPEN_CLAUSE} THEN 1 ELSE 0 END), 0),
         COALESCE(SUM(CASE WHEN {OPEN_CLAUSE} AND severity = 'critical' THEN 1 ELSE 0 END), 0),
         COALESCE(SUM(CASE WHEN {OPEN_CLAUSE} AND severity = 'high' THEN 1 ELSE 0 END), 0)
         FROM incidents {where_clause}"
    );
    let counts = conn.query_row(&counts_sql, params_ref.as_slice(), |r| {
        Ok(IncidentCounts {
            total: r.get(0)?,
            open: r.get(1)?,
            critical: r.get(2)?,
            high: r.get(3)?,
        })
    })?;

    let sql = format!(
        "SELECT * FROM incidents {where_clause}
         ORDER BY created_at DESC, id LIMIT {} OFFSET {}",
        page.per_page,
        page.offset()
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_ref.as_slice(), from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((items, counts))
}

/// All open incidents, oldest deadline first.
pub fn list_open(conn: &Connection) -> Result<Vec<Incident>, DatabaseError> {
    let sql = format!("SELECT * FROM incidents WHERE {OPEN_CLAUSE} ORDER BY sla_deadline, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Open, not yet escalated critical incidents created before `cutoff`.
pub fn critical_open_older_than(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Incident>, DatabaseError> {
    let sql = format!(
        "SELECT * FROM incidents
         WHERE {OPEN_CLAUSE} AND severity = ?1 AND escalated = 0 AND created_at < ?2
         ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![Severity::Critical.as_str(), format_ts(cutoff)],
            from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_by_status(
    conn: &Connection,
) -> Result<std::collections::BTreeMap<IncidentStatus, u64>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) AS n FROM incidents GROUP BY status")?;
    let rows = stmt
        .query_map([], |r| Ok((get_parsed(r, "status")?, r.get::<_, u64>("n")?)))?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}
