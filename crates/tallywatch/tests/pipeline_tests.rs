//! End-to-end tests for submission, extraction, validation and triage.

mod common;

use chrono::Duration as ChronoDuration;

use tallywatch::broadcast::job_progress::JobPhase;
use tallywatch::document::DocumentStatus;
use tallywatch::extract::CellState;
use tallywatch::incident::{IncidentStatus, IncidentType};
use tallywatch::payload::{project_v1, upgrade};
use tallywatch::pipeline::{DocumentSubmission, NoopProgress, ProgressEvent, ProgressReporter};
use tallywatch::provider::{BreakerState, ProviderError};
use tallywatch::review::{ReviewPriority, ReviewReason};
use tallywatch::validation::{RuleId, Severity};
use tallywatch::worker::{JobKind, JobPriority, JobStatus};

use common::{clean_sheet, pdf, png, ConfigBuilder, TallySheet, TestHarness, TABLE_CODE};

// ─── Outcomes ───

#[test]
fn test_clean_sheet_is_accepted() {
    let harness = TestHarness::new();
    let doc = harness.process("mesa-003.png", png(1), clean_sheet(TABLE_CODE));

    assert_eq!(doc.status, DocumentStatus::Accepted);
    assert!(harness.findings(&doc.id).iter().all(|f| f.passed));
    assert!(harness.incidents_for_table(TABLE_CODE).is_empty());
    assert!(harness.ctx().review.items_for_document(&doc.id).unwrap().is_empty());
    assert!(harness
        .jobs(&doc.id)
        .iter()
        .all(|j| j.status == JobStatus::Completed));
}

#[test]
fn test_arithmetic_mismatch_raises_critical_incident() {
    let harness = TestHarness::new();
    let output = TallySheet::new(TABLE_CODE)
        .tally("party_a", "300")
        .tally("party_b", "180")
        .total("498")
        .build();
    let doc = harness.process("mesa-003.png", png(2), output);

    let mismatches = harness.failed_findings(&doc.id, RuleId::ArithmeticMismatch);
    assert_eq!(mismatches.len(), 1);
    let finding = &mismatches[0];
    assert_eq!(finding.severity, Severity::Critical);
    assert_eq!(finding.details["delta"], 18);
    assert_eq!(finding.details["sum"], 480);
    assert_eq!(finding.details["declared"], 498);
    assert_eq!(finding.table_id.as_deref(), Some(TABLE_CODE));

    assert_eq!(doc.status, DocumentStatus::IncidentRaised);
    let incidents = harness.incidents_for_table(TABLE_CODE);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].incident_type, IncidentType::ArithmeticMismatch);
    assert_eq!(incidents[0].severity, Severity::Critical);
    assert_eq!(incidents[0].status, IncidentStatus::Open);
    assert_eq!(incidents[0].document_id.as_deref(), Some(doc.id.as_str()));
    assert_eq!(
        incidents[0].sla_deadline,
        harness.now() + ChronoDuration::minutes(10)
    );

    let items = harness.ctx().review.items_for_document(&doc.id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].reason, ReviewReason::ArithmeticMismatch);
    assert_eq!(items[0].priority, ReviewPriority::Urgent);
}

#[test]
fn test_mark_is_kept_out_of_the_sum() {
    let harness = TestHarness::new();
    let output = TallySheet::new(TABLE_CODE)
        .tally("party_a", "210")
        .tally("party_b", "***")
        .total("210")
        .build();
    let doc = harness.process("mesa-003.png", png(3), output);

    let marked = harness.field(&doc.id, "tally.party_b");
    assert_eq!(marked.value, None);
    assert_eq!(marked.mark.as_ref().map(|m| m.symbol.as_str()), Some("***"));
    assert_eq!(marked.state, CellState::Marked);
    assert!(marked.needs_review);
    assert_eq!(marked.confidence, 0.0);

    // 210 + mark against 210 reconciles: the mark did not count as zero
    // votes on top, and it was not silently dropped either.
    let arithmetic: Vec<_> = harness
        .findings(&doc.id)
        .into_iter()
        .filter(|f| f.rule_id == RuleId::ArithmeticMismatch)
        .collect();
    assert_eq!(arithmetic.len(), 1);
    assert!(arithmetic[0].passed);
    assert_eq!(arithmetic[0].details["excludedMarks"][0]["key"], "tally.party_b");

    assert_eq!(harness.failed_findings(&doc.id, RuleId::MarkDetected).len(), 1);
    assert_eq!(doc.status, DocumentStatus::Accepted);

    let items = harness.ctx().review.items_for_document(&doc.id).unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0]
        .sub_items
        .iter()
        .any(|s| s.field_key == "tally.party_b" && s.mark.as_deref() == Some("***")));
}

#[test]
fn test_mark_with_short_total_still_mismatches() {
    let harness = TestHarness::new();
    let output = TallySheet::new(TABLE_CODE)
        .tally("party_a", "210")
        .tally("party_b", "***")
        .total("300")
        .build();
    let doc = harness.process("mesa-003.png", png(4), output);

    let mismatches = harness.failed_findings(&doc.id, RuleId::ArithmeticMismatch);
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].details["sum"], 210);
    assert_eq!(mismatches[0].details["delta"], 90);
}

#[test]
fn test_header_disagreement_is_a_source_mismatch() {
    let harness = TestHarness::new();
    let output = TallySheet::new(TABLE_CODE)
        .header("table", "004")
        .tally("party_a", "10")
        .total("10")
        .build();
    let doc = harness.process("mesa-003.png", png(5), output);

    let mismatches = harness.failed_findings(&doc.id, RuleId::HeaderCodeMismatch);
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].details["findingType"], "source-mismatch");
    assert_eq!(doc.status, DocumentStatus::IncidentRaised);

    let incidents = harness.incidents(Default::default());
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].incident_type, IncidentType::HeaderCodeMismatch);
}

#[test]
fn test_low_severity_failures_do_not_raise_incidents() {
    let harness = TestHarness::new();
    let output = TallySheet::new(TABLE_CODE)
        .without_code()
        .tally("party_a", "10")
        .total("10")
        .build();
    let doc = harness.process("mesa-003.png", png(6), output);

    assert_eq!(harness.failed_findings(&doc.id, RuleId::CodeUnavailable).len(), 1);
    assert_eq!(doc.status, DocumentStatus::Accepted);
    assert!(harness.incidents(Default::default()).is_empty());
    assert_eq!(
        harness.ctx().review.items_for_document(&doc.id).unwrap()[0].reason,
        ReviewReason::SourceMismatch
    );
}

#[test]
fn test_repeated_mismatch_on_same_table_shares_one_incident() {
    let harness = TestHarness::new();
    let output = TallySheet::new(TABLE_CODE)
        .tally("party_a", "300")
        .tally("party_b", "180")
        .total("498")
        .build();
    let first = harness.process("scan-1.png", png(7), output.clone());
    let second = harness.process("scan-2.png", png(8), output);

    assert_ne!(first.id, second.id);
    let incidents = harness.incidents_for_table(TABLE_CODE);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].document_id.as_deref(), Some(first.id.as_str()));
}

// ─── Submission ───

#[test]
fn test_resubmission_returns_existing_jobs() {
    let harness = TestHarness::new();
    let content = png(10);
    let first = harness.submit("mesa-003.png", content.clone(), clean_sheet(TABLE_CODE));
    harness.run_queued();

    let again = harness.submit_raw(DocumentSubmission::new("copy.png", content));
    assert!(again.duplicate);
    assert_eq!(again.document_id, first.document_id);
    assert_eq!(again.job_ids, first.job_ids);
    assert!(harness.ctx().queue.is_empty());
    assert_eq!(harness.provider.calls(), 1);
}

#[test]
fn test_rejected_content_is_not_stored() {
    let harness = TestHarness::new();
    let err = harness
        .pipeline
        .submit(DocumentSubmission::new("notes.txt", b"not a form".to_vec()))
        .unwrap_err();
    assert_eq!(err.code(), "E_UNSUPPORTED_FORMAT");
    assert!(harness.ctx().queue.is_empty());
}

#[test]
fn test_page_jobs_finalise_once() {
    let harness = TestHarness::with_config(ConfigBuilder::new().split_pages(true).build());
    let content = pdf(3, 1);
    let receipt = harness.submit("acta.pdf", content, clean_sheet(TABLE_CODE));
    assert_eq!(receipt.job_ids.len(), 3);

    let outcomes = harness.run_queued();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.succeeded() && o.kind == JobKind::Page));

    let doc = harness.document(&receipt.document_id);
    assert_eq!(doc.page_count, 3);
    assert_eq!(doc.status, DocumentStatus::Accepted);

    // Findings are written by the one job that completed the document.
    let arithmetic = harness
        .findings(&doc.id)
        .into_iter()
        .filter(|f| f.rule_id == RuleId::ArithmeticMismatch)
        .count();
    assert_eq!(arithmetic, 1);
    assert_eq!(harness.provider.calls(), 3);
}

#[test]
fn test_priority_jobs_run_first() {
    let harness = TestHarness::new();
    let low_content = png(20);
    let high_content = png(21);
    harness
        .provider
        .set_output_for_content(&low_content, clean_sheet(TABLE_CODE));
    harness
        .provider
        .set_output_for_content(&high_content, clean_sheet("05-001-01-02-004"));

    let low = harness.submit_raw(
        DocumentSubmission::new("low.png", low_content).with_priority(JobPriority::Low),
    );
    let high = harness.submit_raw(
        DocumentSubmission::new("high.png", high_content).with_priority(JobPriority::Urgent),
    );

    let outcomes = harness.run_queued();
    assert_eq!(outcomes[0].document_id, high.document_id);
    assert_eq!(outcomes[1].document_id, low.document_id);
}

// ─── Provider failures ───

#[test]
fn test_transient_failure_is_retried_within_the_attempt() {
    let harness = TestHarness::new();
    harness
        .provider
        .fail_next(ProviderError::Connection("reset by peer".into()));
    let doc = harness.process("mesa-003.png", png(30), clean_sheet(TABLE_CODE));

    assert_eq!(doc.status, DocumentStatus::Accepted);
    assert_eq!(harness.provider.calls(), 2);
    assert_eq!(harness.jobs(&doc.id)[0].attempts, 1);
}

#[test]
fn test_exhausted_attempt_requeues_the_job() {
    let harness = TestHarness::new();
    for _ in 0..3 {
        harness
            .provider
            .fail_next(ProviderError::Server { status: 503, message: "busy".into() });
    }
    let receipt = harness.submit("mesa-003.png", png(31), clean_sheet(TABLE_CODE));

    let outcomes = harness.run_queued();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].requeued);
    assert_eq!(outcomes[0].error_code.as_deref(), Some("E_PROVIDER_SERVER"));
    assert!(outcomes[1].succeeded());

    let doc = harness.document(&receipt.document_id);
    assert_eq!(doc.status, DocumentStatus::Accepted);
    assert_eq!(harness.jobs(&doc.id)[0].attempts, 2);
}

#[test]
fn test_permanent_failure_fails_the_document() {
    let harness = TestHarness::new();
    harness
        .provider
        .fail_next(ProviderError::MalformedInput("unreadable scan".into()));
    let receipt = harness.submit("mesa-003.png", png(32), clean_sheet(TABLE_CODE));

    let outcomes = harness.run_queued();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, JobStatus::Failed);
    assert!(!outcomes[0].requeued);

    let doc = harness.document(&receipt.document_id);
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc
        .status_reason
        .as_deref()
        .unwrap_or_default()
        .starts_with("E_MALFORMED_INPUT"));
    assert_eq!(harness.provider.calls(), 1);
}

#[test]
fn test_open_breaker_requeues_until_cooldown() {
    let harness = TestHarness::with_config(ConfigBuilder::new().breaker(2, 50).build());
    for _ in 0..2 {
        harness
            .provider
            .fail_next(ProviderError::Timeout(std::time::Duration::from_secs(30)));
    }
    let receipt = harness.submit("mesa-003.png", png(33), clean_sheet(TABLE_CODE));

    let first = harness.run_next().expect("job should run");
    assert!(first.requeued);
    assert_eq!(first.error_code.as_deref(), Some("E_CIRCUIT_OPEN"));
    assert_eq!(harness.ctx().breaker.state(), BreakerState::Open);
    assert_eq!(
        harness.document(&receipt.document_id).status,
        DocumentStatus::Queued
    );
    assert_eq!(harness.provider.calls(), 2);

    harness.clock.advance(ChronoDuration::seconds(1));
    let outcomes = harness.run_queued();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].succeeded());
    assert_eq!(harness.ctx().breaker.state(), BreakerState::Closed);
    assert_eq!(
        harness.document(&receipt.document_id).status,
        DocumentStatus::Accepted
    );
}

#[test]
fn test_recover_requeues_interrupted_jobs() {
    let harness = TestHarness::new();
    let receipt = harness.submit("mesa-003.png", png(34), clean_sheet(TABLE_CODE));

    // Simulate a crash: the job is claimed from memory but never run.
    let _lost = harness.ctx().queue.claim(std::time::Duration::from_millis(50));
    assert!(harness.ctx().queue.is_empty());

    assert_eq!(harness.pipeline.recover().unwrap(), 1);
    harness.run_queued();
    assert_eq!(
        harness.document(&receipt.document_id).status,
        DocumentStatus::Accepted
    );
}

/// Stands in for a process dying once findings are stored but not routed.
struct DiesAtTriage;

impl ProgressReporter for DiesAtTriage {
    fn report(&self, event: ProgressEvent) {
        if let ProgressEvent::Phase {
            phase: JobPhase::Triaging,
            ..
        } = event
        {
            panic!("worker died while triaging");
        }
    }
}

#[test]
fn test_recover_routes_findings_of_a_document_left_validated() {
    let harness = TestHarness::new();
    let output = TallySheet::new(TABLE_CODE)
        .tally("party_a", "300")
        .tally("party_b", "180")
        .total("498")
        .build();
    let receipt = harness.submit("mesa-003.png", png(35), output);

    let job = harness
        .ctx()
        .queue
        .claim(std::time::Duration::from_millis(50))
        .unwrap();
    let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        harness.pipeline.execute_with(job, 0, &DiesAtTriage)
    }));
    assert!(crashed.is_err());
    assert_eq!(
        harness.document(&receipt.document_id).status,
        DocumentStatus::Validated
    );
    assert!(harness.incidents_for_table(TABLE_CODE).is_empty());

    assert_eq!(harness.pipeline.recover().unwrap(), 1);
    let outcomes = harness.run_queued();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].succeeded());

    let doc = harness.document(&receipt.document_id);
    assert_eq!(doc.status, DocumentStatus::IncidentRaised);
    assert_eq!(
        harness.failed_findings(&doc.id, RuleId::ArithmeticMismatch).len(),
        1
    );
    let incidents = harness.incidents_for_table(TABLE_CODE);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].incident_type, IncidentType::ArithmeticMismatch);
    assert_eq!(incidents[0].document_id.as_deref(), Some(doc.id.as_str()));
    let items = harness.ctx().review.items_for_document(&doc.id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].reason, ReviewReason::ArithmeticMismatch);
}

#[test]
fn test_rerunning_a_settled_job_adds_nothing() {
    let harness = TestHarness::new();
    let output = TallySheet::new(TABLE_CODE)
        .tally("party_a", "300")
        .tally("party_b", "180")
        .total("498")
        .build();
    let doc = harness.process("mesa-003.png", png(36), output);
    assert_eq!(doc.status, DocumentStatus::IncidentRaised);

    let job = harness.jobs(&doc.id).remove(0);
    harness
        .ctx()
        .db
        .with_conn(|conn| tallywatch::db::job_repo::requeue(conn, &job.id, "E_TEST", "rerun"))
        .unwrap();
    let outcome = harness
        .pipeline
        .execute_with(job, 0, &NoopProgress)
        .unwrap()
        .unwrap();
    assert!(outcome.succeeded());

    assert_eq!(harness.incidents_for_table(TABLE_CODE).len(), 1);
    assert_eq!(harness.ctx().review.items_for_document(&doc.id).unwrap().len(), 1);
}

// ─── Corrections and export ───

#[test]
fn test_cell_reread_is_applied_as_correction() {
    let harness = TestHarness::new();
    let content = png(40);
    let doc = harness.process(
        "mesa-003.png",
        content.clone(),
        TallySheet::new(TABLE_CODE)
            .tally("party_a", "210")
            .tally("party_b", "***")
            .total("398")
            .build(),
    );
    assert_eq!(doc.status, DocumentStatus::IncidentRaised);

    harness.provider.set_output_for_content(
        &content,
        TallySheet::new(TABLE_CODE).tally("party_b", "188").build(),
    );
    let job_id = harness
        .pipeline
        .reread_cell(&doc.id, 1, "tally.party_b", JobPriority::High)
        .unwrap();
    let outcomes = harness.run_queued();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].job_id, job_id);
    assert_eq!(outcomes[0].kind, JobKind::Cell);

    let payload = harness.pipeline.payload(&doc.id).unwrap();
    let party_b = payload.tallies.iter().find(|t| t.name == "party_b").unwrap();
    assert_eq!(party_b.value, Some(188));
    assert_eq!(party_b.mark, None);

    // The stored reading itself is untouched.
    assert_eq!(harness.field(&doc.id, "tally.party_b").raw_text, "***");
}

#[test]
fn test_reread_of_unknown_field_is_rejected() {
    let harness = TestHarness::new();
    let doc = harness.process("mesa-003.png", png(41), clean_sheet(TABLE_CODE));
    let err = harness
        .pipeline
        .reread_cell(&doc.id, 1, "tally.nobody", JobPriority::Normal)
        .unwrap_err();
    assert_eq!(err.code(), "E_FIELD_NOT_FOUND");
}

#[test]
fn test_export_round_trips_through_legacy_shape() {
    let harness = TestHarness::new();
    let doc = harness.process(
        "mesa-003.png",
        png(42),
        TallySheet::new(TABLE_CODE)
            .tally("party_a", "300")
            .tally("party_b", "180")
            .total("498")
            .build(),
    );

    let current = harness.pipeline.payload(&doc.id).unwrap();
    assert_eq!(current.header.id, TABLE_CODE);
    assert_eq!(current.declared_total, Some(498));

    let legacy = project_v1(&current);
    assert_eq!(legacy.table_code, TABLE_CODE);
    assert_eq!(legacy.votes["party_a"], 300);
    assert_eq!(legacy.votes["party_b"], 180);
    assert!(!legacy.validations["arithmetic-mismatch"]);
    assert!(legacy.validations["header-code-mismatch"]);

    assert_eq!(project_v1(&upgrade(legacy.clone())), legacy);
}
