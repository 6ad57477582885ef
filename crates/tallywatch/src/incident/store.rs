use chrono::Duration;
use rusqlite::Connection;
use uuid::Uuid;

use super::sla;
use super::types::{
    CreateOutcome, Incident, IncidentFilter, IncidentPage, IncidentStatus, NewIncident,
    PageRequest,
};
use crate::clock::SharedClock;
use crate::db::audit_repo::{self, AuditEntry, NewAuditEntry};
use crate::db::{incident_repo, is_constraint_violation, Database};
use crate::error::IncidentError;

const AUDIT_ENTITY: &str = "incident";

/// Incident store. Dedup and status transitions run inside a transaction
/// on the shared connection; the partial unique index on open incidents
/// backs the dedup check.
#[derive(Clone)]
pub struct IncidentStore {
    db: Database,
    clock: SharedClock,
}

impl IncidentStore {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Creates an incident. With `dedupe`, an open incident carrying the same
    /// (type, table, description) is returned unchanged; without it, such a
    /// duplicate is an error.
    pub fn create(&self, data: NewIncident, dedupe: bool) -> Result<CreateOutcome, IncidentError> {
        let now = self.clock.now();
        let outcome = self.db.with_tx(|tx| {
            if let Some(existing) = incident_repo::find_open_by_signature(
                tx,
                data.incident_type,
                &data.table_id,
                &data.description,
            )? {
                if !dedupe {
                    return Err(IncidentError::DuplicateOpen {
                        existing_id: existing.id,
                    });
                }
                return Ok(CreateOutcome {
                    incident: existing,
                    created: false,
                });
            }

            let incident = Incident {
                id: Uuid::new_v4().to_string(),
                incident_type: data.incident_type,
                severity: data.severity,
                table_id: data.table_id.clone(),
                description: data.description.clone(),
                evidence: data.evidence.clone(),
                status: IncidentStatus::Open,
                source: data.source,
                document_id: data.document_id.clone(),
                assignee: None,
                resolution: None,
                escalated: false,
                escalated_at: None,
                created_at: now,
                updated_at: now,
                sla_deadline: sla::deadline(data.incident_type, data.severity, now),
                closed_at: None,
            };
            incident_repo::insert(tx, &incident).map_err(|e| {
                if is_constraint_violation(&e) {
                    IncidentError::DuplicateOpen {
                        existing_id: String::new(),
                    }
                } else {
                    IncidentError::from(e)
                }
            })?;
            audit(
                tx,
                &incident.id,
                incident.source.as_str(),
                "create",
                None,
                IncidentStatus::Open,
                Some(incident.incident_type.as_str()),
                now,
            )?;
            Ok(CreateOutcome {
                incident,
                created: true,
            })
        })?;

        if outcome.created {
            log::info!(
                "Incident {} created: {} ({}) for table {}, due {}",
                outcome.incident.id,
                outcome.incident.incident_type,
                outcome.incident.severity,
                outcome.incident.table_id,
                outcome.incident.sla_deadline
            );
        } else {
            log::debug!(
                "Incident {} already open for {} on table {}",
                outcome.incident.id,
                outcome.incident.incident_type,
                outcome.incident.table_id
            );
        }
        Ok(outcome)
    }

    pub fn get(&self, id: &str) -> Result<Incident, IncidentError> {
        self.db
            .with_conn(|conn| incident_repo::find_by_id(conn, id))?
            .ok_or_else(|| IncidentError::NotFound(id.to_string()))
    }

    pub fn list(
        &self,
        filter: &IncidentFilter,
        page: PageRequest,
    ) -> Result<IncidentPage, IncidentError> {
        let (items, counts) = self
            .db
            .with_conn(|conn| incident_repo::list(conn, filter, page))?;
        Ok(IncidentPage {
            items,
            total: counts.total,
            open: counts.open,
            critical: counts.critical,
            high: counts.high,
            page: page.page.max(1),
            per_page: page.per_page,
        })
    }

    pub fn list_open(&self) -> Result<Vec<Incident>, IncidentError> {
        Ok(self.db.with_conn(incident_repo::list_open)?)
    }

    pub fn history(&self, id: &str) -> Result<Vec<AuditEntry>, IncidentError> {
        Ok(self
            .db
            .with_conn(|conn| audit_repo::list_for(conn, AUDIT_ENTITY, id))?)
    }

    pub fn update_status(
        &self,
        id: &str,
        to: IncidentStatus,
        actor: &str,
        note: Option<&str>,
    ) -> Result<Incident, IncidentError> {
        self.transition(id, actor, "update_status", note, |incident| {
            check_transition(incident, to)?;
            incident.status = to;
            Ok(())
        })
    }

    /// Assigns an owner. Open and escalated incidents move to `assigned`;
    /// incidents already being worked keep their status.
    pub fn assign(&self, id: &str, assignee: &str, actor: &str) -> Result<Incident, IncidentError> {
        self.transition(id, actor, "assign", Some(assignee), |incident| {
            if matches!(
                incident.status,
                IncidentStatus::Open | IncidentStatus::Escalated
            ) {
                check_transition(incident, IncidentStatus::Assigned)?;
                incident.status = IncidentStatus::Assigned;
            } else {
                ensure_mutable(incident)?;
            }
            incident.assignee = Some(assignee.to_string());
            Ok(())
        })
    }

    pub fn resolve(&self, id: &str, resolution: &str, actor: &str) -> Result<Incident, IncidentError> {
        self.transition(id, actor, "resolve", Some(resolution), |incident| {
            check_transition(incident, IncidentStatus::Resolved)?;
            incident.status = IncidentStatus::Resolved;
            incident.resolution = Some(resolution.to_string());
            Ok(())
        })
    }

    pub fn mark_false_positive(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<Incident, IncidentError> {
        self.transition(id, actor, "false_positive", Some(reason), |incident| {
            check_transition(incident, IncidentStatus::FalsePositive)?;
            incident.status = IncidentStatus::FalsePositive;
            incident.resolution = Some(reason.to_string());
            Ok(())
        })
    }

    pub fn escalate(&self, id: &str, reason: &str, actor: &str) -> Result<Incident, IncidentError> {
        self.transition(id, actor, "escalate", Some(reason), |incident| {
            check_transition(incident, IncidentStatus::Escalated)?;
            incident.status = IncidentStatus::Escalated;
            Ok(())
        })
    }

    /// Escalates every open critical incident older than `threshold` that has
    /// not been escalated yet. Returns the escalated incidents.
    pub fn escalate_overdue(
        &self,
        threshold: Duration,
        actor: &str,
    ) -> Result<Vec<Incident>, IncidentError> {
        let cutoff = self.clock.now() - threshold;
        let candidates = self
            .db
            .with_conn(|conn| incident_repo::critical_open_older_than(conn, cutoff))?;

        let mut escalated = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let reason = format!(
                "critical incident unresolved for more than {} minutes",
                threshold.num_minutes()
            );
            match self.escalate(&candidate.id, &reason, actor) {
                Ok(incident) => escalated.push(incident),
                // Closed or escalated between the scan and the update.
                Err(IncidentError::InvalidTransition { .. }) | Err(IncidentError::Closed { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if !escalated.is_empty() {
            log::warn!("Escalated {} overdue critical incident(s)", escalated.len());
        }
        Ok(escalated)
    }

    /// Loads, mutates and writes back one incident in a single transaction,
    /// recording the status change in the audit log.
    fn transition<F>(
        &self,
        id: &str,
        actor: &str,
        action: &str,
        note: Option<&str>,
        mutate: F,
    ) -> Result<Incident, IncidentError>
    where
        F: FnOnce(&mut Incident) -> Result<(), IncidentError>,
    {
        let now = self.clock.now();
        let updated = self.db.with_tx(|tx| {
            let mut incident = incident_repo::find_by_id(tx, id)?
                .ok_or_else(|| IncidentError::NotFound(id.to_string()))?;
            let from = incident.status;
            mutate(&mut incident)?;
            incident.updated_at = now;
            if incident.status == IncidentStatus::Escalated && !incident.escalated {
                incident.escalated = true;
                incident.escalated_at = Some(now);
            }
            if incident.status.is_terminal() {
                incident.closed_at = Some(now);
            }
            incident_repo::update(tx, &incident)?;
            audit(tx, id, actor, action, Some(from), incident.status, note, now)?;
            Ok::<_, IncidentError>(incident)
        })?;
        log::info!(
            "Incident {} {} by {}: now {}",
            updated.id,
            action,
            actor,
            updated.status
        );
        Ok(updated)
    }
}

fn ensure_mutable(incident: &Incident) -> Result<(), IncidentError> {
    if incident.status.is_terminal() {
        return Err(IncidentError::Closed {
            id: incident.id.clone(),
            status: incident.status,
        });
    }
    Ok(())
}

fn check_transition(incident: &Incident, to: IncidentStatus) -> Result<(), IncidentError> {
    ensure_mutable(incident)?;
    if !incident.status.can_transition_to(to) {
        return Err(IncidentError::InvalidTransition {
            id: incident.id.clone(),
            from: incident.status,
            to,
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn audit(
    conn: &Connection,
    id: &str,
    actor: &str,
    action: &str,
    from: Option<IncidentStatus>,
    to: IncidentStatus,
    detail: Option<&str>,
    at: chrono::DateTime<chrono::Utc>,
) -> Result<(), IncidentError> {
    audit_repo::record(
        conn,
        &NewAuditEntry {
            entity: AUDIT_ENTITY,
            entity_id: id,
            actor,
            action,
            from_state: from.map(|s| s.as_str()),
            to_state: Some(to.as_str()),
            detail,
        },
        at,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::incident::{IncidentSource, IncidentType};
    use crate::validation::Severity;

    fn setup() -> (IncidentStore, Arc<ManualClock>) {
        let db = Database::open_in_memory().unwrap();
        let clock = Arc::new(ManualClock::default());
        (IncidentStore::new(db, clock.clone()), clock)
    }

    fn low_confidence(table: &str) -> NewIncident {
        NewIncident::standard(
            IncidentType::OcrLowConfidence,
            Severity::High,
            table,
            json!({"confidence": 0.42}),
            IncidentSource::Validation,
        )
    }

    // ─── Creation and dedup ─────────────────────────────────────────────────

    #[test]
    fn test_create_sets_deadline_from_table() {
        let (store, clock) = setup();
        let outcome = store.create(low_confidence("T1"), true).unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.incident.status, IncidentStatus::Open);
        assert_eq!(
            outcome.incident.sla_deadline,
            clock.now() + Duration::minutes(15)
        );
        assert_eq!(outcome.incident.remaining_sla_minutes(clock.now()), 15.0);
    }

    #[test]
    fn test_identical_signature_is_deduplicated() {
        let (store, _clock) = setup();
        let first = store.create(low_confidence("T1"), true).unwrap();
        let second = store.create(low_confidence("T1"), true).unwrap();
        assert!(!second.created);
        assert_eq!(second.incident.id, first.incident.id);

        let other_table = store.create(low_confidence("T2"), true).unwrap();
        assert!(other_table.created);

        let page = store.list(&IncidentFilter::default(), PageRequest::default()).unwrap();
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_duplicate_without_dedupe_is_rejected() {
        let (store, _clock) = setup();
        let first = store.create(low_confidence("T1"), true).unwrap();
        let err = store.create(low_confidence("T1"), false).unwrap_err();
        match err {
            IncidentError::DuplicateOpen { existing_id } => {
                assert_eq!(existing_id, first.incident.id)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_closed_incident_frees_signature() {
        let (store, _clock) = setup();
        let first = store.create(low_confidence("T1"), true).unwrap().incident;
        store.mark_false_positive(&first.id, "scanner smudge", "ana").unwrap();
        let second = store.create(low_confidence("T1"), true).unwrap();
        assert!(second.created);
        assert_ne!(second.incident.id, first.id);
    }

    #[test]
    fn test_concurrent_creates_yield_one_incident() {
        let (store, _clock) = setup();
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.create(low_confidence("T1"), true).unwrap())
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| o.created).count(), 1);
        let ids: std::collections::HashSet<_> =
            outcomes.iter().map(|o| o.incident.id.clone()).collect();
        assert_eq!(ids.len(), 1);
    }

    // ─── State machine ──────────────────────────────────────────────────────

    #[test]
    fn test_full_lifecycle_is_audited() {
        let (store, _clock) = setup();
        let id = store.create(low_confidence("T1"), true).unwrap().incident.id;
        store.assign(&id, "ana", "supervisor").unwrap();
        store
            .update_status(&id, IncidentStatus::Investigating, "ana", None)
            .unwrap();
        let resolved = store.resolve(&id, "recounted, OCR error", "ana").unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert!(resolved.closed_at.is_some());
        assert_eq!(resolved.resolution.as_deref(), Some("recounted, OCR error"));

        let history = store.history(&id).unwrap();
        let actions: Vec<_> = history.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["create", "assign", "update_status", "resolve"]);
        assert_eq!(history[3].from_state.as_deref(), Some("investigating"));
        assert_eq!(history[3].to_state.as_deref(), Some("resolved"));
    }

    #[test]
    fn test_resolved_incident_is_immutable() {
        let (store, _clock) = setup();
        let id = store.create(low_confidence("T1"), true).unwrap().incident.id;
        store.mark_false_positive(&id, "duplicate scan", "ana").unwrap();

        assert!(matches!(
            store.assign(&id, "luis", "ana"),
            Err(IncidentError::Closed { .. })
        ));
        assert!(matches!(
            store.escalate(&id, "late", "agent"),
            Err(IncidentError::Closed { .. })
        ));
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let (store, _clock) = setup();
        let id = store.create(low_confidence("T1"), true).unwrap().incident.id;
        let err = store.resolve(&id, "skip", "ana").unwrap_err();
        assert_eq!(err.code(), "E_INCIDENT_TRANSITION");
        assert_eq!(store.get(&id).unwrap().status, IncidentStatus::Open);
    }

    #[test]
    fn test_escalated_incident_can_still_be_worked() {
        let (store, _clock) = setup();
        let id = store.create(low_confidence("T1"), true).unwrap().incident.id;
        let escalated = store.escalate(&id, "needs legal", "supervisor").unwrap();
        assert!(escalated.escalated);
        assert!(escalated.escalated_at.is_some());

        let assigned = store.assign(&id, "legal-team", "supervisor").unwrap();
        assert_eq!(assigned.status, IncidentStatus::Assigned);
        assert!(assigned.escalated);
        store
            .update_status(&id, IncidentStatus::Investigating, "legal-team", None)
            .unwrap();
        store.resolve(&id, "filed claim", "legal-team").unwrap();
    }

    // ─── Escalation and listing ─────────────────────────────────────────────

    #[test]
    fn test_escalate_overdue_only_touches_old_criticals() {
        let (store, clock) = setup();
        let critical = store
            .create(
                NewIncident::standard(
                    IncidentType::ArithmeticMismatch,
                    Severity::Critical,
                    "T1",
                    json!({}),
                    IncidentSource::Validation,
                ),
                true,
            )
            .unwrap()
            .incident;
        store.create(low_confidence("T2"), true).unwrap();

        clock.advance(Duration::minutes(20));
        let fresh = store
            .create(
                NewIncident::standard(
                    IncidentType::HeaderCodeMismatch,
                    Severity::Critical,
                    "T3",
                    json!({}),
                    IncidentSource::Validation,
                ),
                true,
            )
            .unwrap()
            .incident;

        let escalated = store.escalate_overdue(Duration::minutes(15), "agent").unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].id, critical.id);
        assert_eq!(store.get(&fresh.id).unwrap().status, IncidentStatus::Open);

        // Already escalated incidents are not escalated again.
        clock.advance(Duration::minutes(20));
        let again = store.escalate_overdue(Duration::minutes(15), "agent").unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, fresh.id);
    }

    #[test]
    fn test_list_filters_and_aggregates() {
        let (store, _clock) = setup();
        for table in ["T1", "T2", "T3"] {
            store.create(low_confidence(table), true).unwrap();
        }
        let critical = store
            .create(
                NewIncident::standard(
                    IncidentType::ArithmeticMismatch,
                    Severity::Critical,
                    "T1",
                    json!({}),
                    IncidentSource::Validation,
                ),
                true,
            )
            .unwrap()
            .incident;
        store.mark_false_positive(&critical.id, "misread", "ana").unwrap();

        let all = store
            .list(&IncidentFilter::default(), PageRequest { page: 1, per_page: 2 })
            .unwrap();
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.total, 4);
        assert_eq!(all.open, 3);
        assert_eq!(all.high, 3);
        assert_eq!(all.critical, 0);

        let t1 = store
            .list(
                &IncidentFilter {
                    table_id: Some("T1".into()),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .unwrap();
        assert_eq!(t1.total, 2);

        let open_only = store
            .list(
                &IncidentFilter {
                    status: Some(IncidentStatus::Open),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .unwrap();
        assert_eq!(open_only.total, 3);
        assert_eq!(store.list_open().unwrap().len(), 3);
    }
}
