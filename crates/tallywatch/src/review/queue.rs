use chrono::Duration;
use uuid::Uuid;

use super::item::{Correction, NewReviewItem, ReviewItem, ReviewStats, ReviewStatus};
use crate::clock::SharedClock;
use crate::db::audit_repo::{self, NewAuditEntry};
use crate::db::{field_repo, review_repo, Database};
use crate::error::ReviewError;
use crate::extract::{
    CellState, CorrectionSource, ExtractedField, FieldCorrection, Mark, MarkMeaning, MarkTable,
};

pub const DEFAULT_CLAIM_TTL_MINUTES: i64 = 30;

const AUDIT_ENTITY: &str = "review_item";

/// Review queue backed by the `review_items` table.
///
/// Every check-then-write runs inside one transaction on the shared
/// connection, so two reviewers asking for work at the same time never
/// receive the same item.
#[derive(Clone)]
pub struct ReviewQueue {
    db: Database,
    clock: SharedClock,
    claim_ttl: Duration,
    marks: MarkTable,
}

impl ReviewQueue {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self {
            db,
            clock,
            claim_ttl: Duration::minutes(DEFAULT_CLAIM_TTL_MINUTES),
            marks: MarkTable::default(),
        }
    }

    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    /// Mark table used to interpret corrected marks.
    pub fn with_marks(mut self, marks: MarkTable) -> Self {
        self.marks = marks;
        self
    }

    pub fn enqueue(&self, item: NewReviewItem) -> Result<ReviewItem, ReviewError> {
        let now = self.clock.now();
        let stored = self.db.with_tx(|tx| insert_item(tx, &item, now))?;
        log_queued(&stored);
        Ok(stored)
    }

    /// Enqueues `item` unless its document already has a review item, in
    /// which case the earliest existing one is returned. Re-running triage
    /// after an interruption goes through here.
    pub fn enqueue_once(&self, item: NewReviewItem) -> Result<ReviewItem, ReviewError> {
        let now = self.clock.now();
        let (stored, created) = self.db.with_tx(|tx| {
            if let Some(found) = review_repo::list_for_document(tx, &item.document_id)?
                .into_iter()
                .next()
            {
                return Ok::<_, ReviewError>((found, false));
            }
            Ok((insert_item(tx, &item, now)?, true))
        })?;
        if created {
            log_queued(&stored);
        } else {
            log::debug!(
                "Document {} already has review item {}",
                stored.document_id,
                stored.id
            );
        }
        Ok(stored)
    }

    /// Claims the next item: the most urgent pending one, or one whose
    /// claim has expired. Returns `None` when nothing is waiting.
    pub fn get_next(&self, reviewer: Option<&str>) -> Result<Option<ReviewItem>, ReviewError> {
        let now = self.clock.now();
        let cutoff = now - self.claim_ttl;
        self.db.with_tx(|tx| {
            let Some(item) = review_repo::next_claimable(tx, cutoff)? else {
                return Ok(None);
            };
            if item.status == ReviewStatus::InProgress {
                log::info!(
                    "Claim on review item {} by {:?} expired, reassigning",
                    item.id,
                    item.assignee
                );
            }
            review_repo::claim(tx, &item.id, reviewer, now)?;
            audit_repo::record(
                tx,
                &NewAuditEntry {
                    entity: AUDIT_ENTITY,
                    entity_id: &item.id,
                    actor: reviewer.unwrap_or("unassigned"),
                    action: "claim",
                    from_state: Some(item.status.as_str()),
                    to_state: Some(ReviewStatus::InProgress.as_str()),
                    detail: None,
                },
                now,
            )?;
            review_repo::find_by_id(tx, &item.id)
                .map_err(ReviewError::from)
        })
    }

    pub fn get(&self, id: &str) -> Result<ReviewItem, ReviewError> {
        self.db
            .with_conn(|conn| review_repo::find_by_id(conn, id))?
            .ok_or_else(|| ReviewError::NotFound(id.to_string()))
    }

    /// Returns a claimed item to the pending pool.
    pub fn release(&self, id: &str, reviewer: &str) -> Result<ReviewItem, ReviewError> {
        let now = self.clock.now();
        self.db.with_tx(|tx| {
            let item = claimed_by(tx, id, reviewer, true)?;
            review_repo::release(tx, id, now)?;
            audit_repo::record(
                tx,
                &NewAuditEntry {
                    entity: AUDIT_ENTITY,
                    entity_id: id,
                    actor: reviewer,
                    action: "release",
                    from_state: Some(item.status.as_str()),
                    to_state: Some(ReviewStatus::Pending.as_str()),
                    detail: None,
                },
                now,
            )?;
            reload(tx, id)
        })
    }

    /// Appends one correction per entry and completes the item. Only the
    /// named claimant may resolve.
    pub fn resolve(
        &self,
        id: &str,
        reviewer: &str,
        corrections: &[Correction],
    ) -> Result<ReviewItem, ReviewError> {
        let now = self.clock.now();
        let resolved = self.db.with_tx(|tx| {
            let item = claimed_by(tx, id, reviewer, false)?;

            for correction in corrections {
                let field = field_repo::find_by_id(tx, &correction.field_id)?
                    .filter(|f| f.document_id == item.document_id)
                    .ok_or_else(|| ReviewError::ForeignField {
                        field_id: correction.field_id.clone(),
                        document_id: item.document_id.clone(),
                    })?;
                field_repo::insert_correction(
                    tx,
                    &FieldCorrection {
                        id: Uuid::new_v4().to_string(),
                        field_id: field.id,
                        document_id: item.document_id.clone(),
                        review_item_id: Some(item.id.clone()),
                        value: correction.value,
                        mark: correction.mark.clone(),
                        source: CorrectionSource::Reviewer,
                        actor: reviewer.to_string(),
                        note: correction.note.clone(),
                        created_at: now,
                    },
                )?;
            }

            review_repo::finish(tx, id, ReviewStatus::Completed, None, now)?;
            let detail = format!("{} correction(s)", corrections.len());
            audit_repo::record(
                tx,
                &NewAuditEntry {
                    entity: AUDIT_ENTITY,
                    entity_id: id,
                    actor: reviewer,
                    action: "resolve",
                    from_state: Some(item.status.as_str()),
                    to_state: Some(ReviewStatus::Completed.as_str()),
                    detail: Some(&detail),
                },
                now,
            )?;
            reload(tx, id)
        })?;
        log::info!(
            "Review item {} resolved by {} with {} correction(s)",
            id,
            reviewer,
            corrections.len()
        );
        Ok(resolved)
    }

    /// Closes the item without corrections.
    pub fn reject(&self, id: &str, reviewer: &str, reason: &str) -> Result<ReviewItem, ReviewError> {
        let now = self.clock.now();
        self.db.with_tx(|tx| {
            let item = claimed_by(tx, id, reviewer, false)?;
            review_repo::finish(tx, id, ReviewStatus::Rejected, Some(reason), now)?;
            audit_repo::record(
                tx,
                &NewAuditEntry {
                    entity: AUDIT_ENTITY,
                    entity_id: id,
                    actor: reviewer,
                    action: "reject",
                    from_state: Some(item.status.as_str()),
                    to_state: Some(ReviewStatus::Rejected.as_str()),
                    detail: Some(reason),
                },
                now,
            )?;
            reload(tx, id)
        })
    }

    pub fn stats(&self) -> Result<ReviewStats, ReviewError> {
        Ok(self.db.with_conn(review_repo::stats)?)
    }

    pub fn items_for_document(&self, document_id: &str) -> Result<Vec<ReviewItem>, ReviewError> {
        Ok(self
            .db
            .with_conn(|conn| review_repo::list_for_document(conn, document_id))?)
    }

    /// The document's fields with every correction applied in append order.
    pub fn effective_fields(&self, document_id: &str) -> Result<Vec<ExtractedField>, ReviewError> {
        let (fields, corrections) = self.db.with_conn(|conn| {
            Ok((
                field_repo::list_for_document(conn, document_id)?,
                field_repo::corrections_for_document(conn, document_id)?,
            ))
        })?;
        Ok(apply_corrections(fields, &corrections, &self.marks))
    }
}

/// Loads an item that is in progress and held by `reviewer`. An item
/// claimed without a reviewer can only be released.
fn claimed_by(
    conn: &rusqlite::Connection,
    id: &str,
    reviewer: &str,
    allow_unassigned: bool,
) -> Result<ReviewItem, ReviewError> {
    let item =
        review_repo::find_by_id(conn, id)?.ok_or_else(|| ReviewError::NotFound(id.to_string()))?;
    if item.status != ReviewStatus::InProgress {
        return Err(ReviewError::InvalidState {
            id: id.to_string(),
            status: item.status,
            expected: "in_progress",
        });
    }
    match item.assignee.as_deref() {
        Some(holder) if holder != reviewer => Err(ReviewError::ClaimedByOther {
            id: id.to_string(),
            holder: holder.to_string(),
        }),
        None if !allow_unassigned => Err(ReviewError::Unassigned { id: id.to_string() }),
        _ => Ok(item),
    }
}

fn insert_item(
    conn: &rusqlite::Connection,
    item: &NewReviewItem,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<ReviewItem, ReviewError> {
    let id = Uuid::new_v4().to_string();
    let stored = review_repo::insert(conn, &id, item, now)?;
    audit_repo::record(
        conn,
        &NewAuditEntry {
            entity: AUDIT_ENTITY,
            entity_id: &id,
            actor: "system",
            action: "enqueue",
            from_state: None,
            to_state: Some(ReviewStatus::Pending.as_str()),
            detail: Some(item.reason.as_str()),
        },
        now,
    )?;
    Ok(stored)
}

fn log_queued(item: &ReviewItem) {
    log::info!(
        "Queued review item {} ({}, {}) for document {}",
        item.id,
        item.priority,
        item.reason,
        item.document_id
    );
}

fn reload(conn: &rusqlite::Connection, id: &str) -> Result<ReviewItem, ReviewError> {
    review_repo::find_by_id(conn, id)?.ok_or_else(|| ReviewError::NotFound(id.to_string()))
}

/// Applies corrections to extracted fields. Later corrections win; a
/// corrected field is treated as fully confident.
pub fn apply_corrections(
    mut fields: Vec<ExtractedField>,
    corrections: &[FieldCorrection],
    marks: &MarkTable,
) -> Vec<ExtractedField> {
    for correction in corrections {
        let Some(field) = fields.iter_mut().find(|f| f.id == correction.field_id) else {
            log::warn!(
                "Correction {} references unknown field {}",
                correction.id,
                correction.field_id
            );
            continue;
        };
        match (&correction.mark, correction.value) {
            (Some(symbol), _) => {
                let mark = marks.detect(symbol).unwrap_or_else(|| Mark {
                    symbol: symbol.clone(),
                    meaning: MarkMeaning::Unrecognized,
                });
                field.mark = Some(mark);
                field.value = None;
                field.state = CellState::Marked;
            }
            (None, Some(value)) => {
                field.mark = None;
                field.value = Some(value);
                field.state = CellState::Numeric;
            }
            (None, None) => {
                field.mark = None;
                field.value = None;
                field.state = CellState::Empty;
            }
        }
        field.confidence = 1.0;
        field.needs_review = false;
    }
    fields
}
