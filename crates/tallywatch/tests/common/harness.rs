//! Test harness for isolated pipeline runs.
//!
//! Each `TestHarness` owns a temporary directory holding its database file,
//! so tests never share state. Jobs are executed on the calling thread
//! unless a test starts a `WorkerPool` itself.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tallywatch::clock::{Clock, ManualClock};
use tallywatch::config::Config;
use tallywatch::context::AppContext;
use tallywatch::db::{document_repo, field_repo, finding_repo, job_repo, Database};
use tallywatch::document::Document;
use tallywatch::extract::ExtractedField;
use tallywatch::incident::{Incident, IncidentFilter, PageRequest};
use tallywatch::pipeline::{DocumentSubmission, NoopProgress, Pipeline, SubmissionReceipt};
use tallywatch::provider::{FixtureProvider, ProviderOutput};
use tallywatch::validation::{RuleId, ValidationFinding};
use tallywatch::worker::{JobOutcome, WorkerJob};

use super::builders::ConfigBuilder;

/// How long `run_queued` waits on an empty queue before giving up.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

pub struct TestHarness {
    /// Keeps the database file alive for the harness lifetime.
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub clock: Arc<ManualClock>,
    pub provider: Arc<FixtureProvider>,
    pub pipeline: Pipeline,
}

impl TestHarness {
    /// A harness with the test defaults from `ConfigBuilder::new()`.
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new().build())
    }

    pub fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("tallywatch.db");
        config.database.path = Some(db_path.clone());

        let db = Database::open(&db_path).expect("Failed to open test database");
        let clock = Arc::new(ManualClock::default());
        let provider = Arc::new(FixtureProvider::new());
        let ctx = AppContext::new(config, db, clock.clone(), provider.clone());

        Self {
            temp_dir,
            db_path,
            clock,
            provider,
            pipeline: Pipeline::new(ctx),
        }
    }

    pub fn ctx(&self) -> &AppContext {
        self.pipeline.context()
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    // ─── Submission ───

    /// Registers `output` for `content` and submits it.
    pub fn submit(&self, name: &str, content: Vec<u8>, output: ProviderOutput) -> SubmissionReceipt {
        self.provider.set_output_for_content(&content, output);
        self.submit_raw(DocumentSubmission::new(name, content))
    }

    pub fn submit_raw(&self, submission: DocumentSubmission) -> SubmissionReceipt {
        self.pipeline
            .submit(submission)
            .expect("Submission should be accepted")
    }

    // ─── Execution ───

    /// Claims and runs the next job, waiting briefly for one to be ready.
    pub fn run_next(&self) -> Option<JobOutcome> {
        let job = self.ctx().queue.claim(DRAIN_TIMEOUT)?;
        self.execute(job)
    }

    /// Runs jobs until the queue stays empty for a short while. Requeued
    /// jobs with short delays are picked up again.
    pub fn run_queued(&self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Some(job) = self.ctx().queue.claim(DRAIN_TIMEOUT) {
            if let Some(outcome) = self.execute(job) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn execute(&self, job: WorkerJob) -> Option<JobOutcome> {
        self.pipeline
            .execute_with(job, 0, &NoopProgress)
            .expect("Pipeline bookkeeping should not fail")
    }

    /// Submits and runs to completion in one step.
    pub fn process(&self, name: &str, content: Vec<u8>, output: ProviderOutput) -> Document {
        let receipt = self.submit(name, content, output);
        self.run_queued();
        self.document(&receipt.document_id)
    }

    // ─── Lookups ───

    pub fn document(&self, id: &str) -> Document {
        self.ctx()
            .db
            .with_conn(|conn| document_repo::find_by_id(conn, id))
            .expect("Document lookup failed")
            .expect("Document should exist")
    }

    pub fn fields(&self, document_id: &str) -> Vec<ExtractedField> {
        self.ctx()
            .db
            .with_conn(|conn| field_repo::list_for_document(conn, document_id))
            .expect("Field lookup failed")
    }

    pub fn field(&self, document_id: &str, key: &str) -> ExtractedField {
        self.fields(document_id)
            .into_iter()
            .find(|f| f.key == key)
            .unwrap_or_else(|| panic!("Field {} not stored", key))
    }

    pub fn findings(&self, document_id: &str) -> Vec<ValidationFinding> {
        self.ctx()
            .db
            .with_conn(|conn| finding_repo::list_for_document(conn, document_id))
            .expect("Finding lookup failed")
    }

    pub fn failed_findings(&self, document_id: &str, rule: RuleId) -> Vec<ValidationFinding> {
        self.findings(document_id)
            .into_iter()
            .filter(|f| f.rule_id == rule && !f.passed)
            .collect()
    }

    pub fn jobs(&self, document_id: &str) -> Vec<WorkerJob> {
        self.ctx()
            .db
            .with_conn(|conn| job_repo::list_for_document(conn, document_id))
            .expect("Job lookup failed")
    }

    pub fn incidents(&self, filter: IncidentFilter) -> Vec<Incident> {
        self.ctx()
            .incidents
            .list(&filter, PageRequest::default())
            .expect("Incident listing failed")
            .items
    }

    pub fn incidents_for_table(&self, table_id: &str) -> Vec<Incident> {
        self.incidents(IncidentFilter {
            table_id: Some(table_id.to_string()),
            ..IncidentFilter::default()
        })
    }
}
