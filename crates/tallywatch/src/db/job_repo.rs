//! Job repository: persisted history of worker jobs.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_ts, get_parsed, get_ts, get_ts_opt, DatabaseError};
use crate::worker::job::{JobStatus, WorkerJob};

fn from_row(row: &Row<'_>) -> Result<WorkerJob, rusqlite::Error> {
    let result: Option<String> = row.get("result")?;
    let worker_id: Option<i64> = row.get("worker_id")?;
    let duration_ms: Option<i64> = row.get("duration_ms")?;
    Ok(WorkerJob {
        id: row.get("id")?,
        document_id: row.get("document_id")?,
        kind: get_parsed(row, "kind")?,
        page: row.get("page")?,
        field_key: row.get("field_key")?,
        priority: get_parsed(row, "priority")?,
        status: get_parsed(row, "status")?,
        attempts: row.get("attempts")?,
        worker_id: worker_id.map(|w| w as usize),
        error_code: row.get("error_code")?,
        error: row.get("error")?,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        submitted_at: get_ts(row, "submitted_at")?,
        started_at: get_ts_opt(row, "started_at")?,
        completed_at: get_ts_opt(row, "completed_at")?,
        duration_ms: duration_ms.map(|d| d.max(0) as u64),
    })
}

pub fn insert(conn: &Connection, job: &WorkerJob) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, document_id, kind, page, field_key, priority, status, attempts,
         submitted_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            job.id,
            job.document_id,
            job.kind.as_str(),
            job.page,
            job.field_key,
            job.priority.as_str(),
            job.status.as_str(),
            job.attempts,
            format_ts(job.submitted_at),
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<WorkerJob>, DatabaseError> {
    Ok(conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], from_row)
        .optional()?)
}

pub fn list_for_document(
    conn: &Connection,
    document_id: &str,
) -> Result<Vec<WorkerJob>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM jobs WHERE document_id = ?1 ORDER BY submitted_at, id")?;
    let rows = stmt
        .query_map(params![document_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_by_status(conn: &Connection, status: JobStatus) -> Result<Vec<WorkerJob>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY submitted_at, id")?;
    let rows = stmt
        .query_map(params![status.as_str()], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Claims a queued job for a worker. Returns `false` when the job is not
/// queued (already claimed, finished or unknown): at most one worker wins.
pub fn mark_running(
    conn: &Connection,
    id: &str,
    worker_id: usize,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'running', worker_id = ?2, started_at = ?3,
         attempts = attempts + 1, error_code = NULL, error = NULL
         WHERE id = ?1 AND status = 'queued'",
        params![id, worker_id as i64, format_ts(now)],
    )?;
    Ok(changed == 1)
}

pub fn mark_completed(
    conn: &Connection,
    id: &str,
    result: &serde_json::Value,
    now: DateTime<Utc>,
    duration_ms: u64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status = 'completed', result = ?2, completed_at = ?3, duration_ms = ?4
         WHERE id = ?1",
        params![
            id,
            serde_json::to_string(result)?,
            format_ts(now),
            duration_ms as i64
        ],
    )?;
    Ok(())
}

pub fn mark_failed(
    conn: &Connection,
    id: &str,
    error_code: &str,
    error: &str,
    now: DateTime<Utc>,
    duration_ms: u64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status = 'failed', error_code = ?2, error = ?3, completed_at = ?4,
         duration_ms = ?5 WHERE id = ?1",
        params![id, error_code, error, format_ts(now), duration_ms as i64],
    )?;
    Ok(())
}

/// Puts a job back in the queue, keeping the reason it was requeued.
pub fn requeue(
    conn: &Connection,
    id: &str,
    error_code: &str,
    error: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status = 'queued', worker_id = NULL, error_code = ?2, error = ?3
         WHERE id = ?1",
        params![id, error_code, error],
    )?;
    Ok(())
}

/// Jobs left running by a previous process go back to the queue.
pub fn reset_running(conn: &Connection) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE jobs SET status = 'queued', worker_id = NULL WHERE status = 'running'",
        [],
    )?)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobStats {
    pub completed: u64,
    pub failed: u64,
    pub avg_duration_ms: Option<f64>,
}

impl JobStats {
    pub fn failure_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }
}

/// Outcome counts for jobs finished at or after `since`.
pub fn stats_since(conn: &Connection, since: DateTime<Utc>) -> Result<JobStats, DatabaseError> {
    Ok(conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
            AVG(duration_ms)
         FROM jobs WHERE completed_at >= ?1",
        params![format_ts(since)],
        |r| {
            Ok(JobStats {
                completed: r.get(0)?,
                failed: r.get(1)?,
                avg_duration_ms: r.get(2)?,
            })
        },
    )?)
}
