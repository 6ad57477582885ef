use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::broadcast::job_progress::JobPhase;
use crate::context::AppContext;
use crate::crossval::{cross_validate, decode, CrossValidationResult, OcrHeader};
use crate::db::audit_repo::{self, NewAuditEntry};
use crate::db::field_repo::{self, ExtractedPage};
use crate::db::{document_repo, finding_repo, job_repo, DatabaseError};
use crate::document::{Document, DocumentStatus};
use crate::extract::{CorrectionSource, ExtractedField, FieldCorrection, FieldExtractor, Normalizer};
use crate::intake;
use crate::payload::PayloadV2;
use crate::provider::{FieldSpec, FormSchema, OcrRequest, ProviderGuard, ProviderOutput};
use crate::validation::{ValidationEngine, ValidationFinding};
use crate::worker::job::{JobKind, JobOutcome, JobPriority, JobStatus, WorkerJob};

use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::{BroadcastProgress, ProgressEvent, ProgressReporter};
use super::submission::{DocumentSubmission, SubmissionReceipt};
use super::triage;

/// Runs jobs end to end: extraction, cross-validation, validation, triage.
///
/// Cloning is cheap; every worker thread holds its own clone.
#[derive(Clone)]
pub struct Pipeline {
    ctx: AppContext,
    guard: ProviderGuard,
    extractor: FieldExtractor,
    engine: ValidationEngine,
    schema: Arc<FormSchema>,
}

impl Pipeline {
    pub fn new(ctx: AppContext) -> Self {
        let extraction = &ctx.config.extraction;
        let normalizer = Normalizer::new(extraction.marks.clone())
            .with_repair_confidence(extraction.repair_confidence);
        let extractor = FieldExtractor::new(normalizer, extraction.review_threshold);
        let engine = ValidationEngine::new(ctx.config.validation.clone());
        let schema = Arc::new(FormSchema::tally_sheet(&extraction.parties));
        let guard = ctx.guard();

        Self {
            ctx,
            guard,
            extractor,
            engine,
            schema,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    // ─── Submission ─────────────────────────────────────────────────────────

    /// Inspects, stores and queues a document. Content already known by hash
    /// returns the existing document and its jobs; nothing new is queued.
    pub fn submit(&self, submission: DocumentSubmission) -> Result<SubmissionReceipt, PipelineError> {
        let inspection = intake::inspect(
            &submission.content,
            submission.declared_pages,
            &self.ctx.config.intake,
        )?;
        let now = self.now();
        let split = submission
            .split_pages
            .unwrap_or(self.ctx.config.workers.split_pages)
            && inspection.page_count > 1;

        let (receipt, queued) = self.ctx.db.with_tx(|tx| -> Result<_, PipelineError> {
            if let Some(existing) = document_repo::find_by_hash(tx, &inspection.content_hash)? {
                let mut jobs: Vec<WorkerJob> = job_repo::list_for_document(tx, &existing.id)?
                    .into_iter()
                    .filter(|j| j.kind != JobKind::Cell)
                    .collect();
                jobs.sort_by_key(|j| j.page);
                let job_ids: Vec<String> = jobs.into_iter().map(|j| j.id).collect();
                let receipt = SubmissionReceipt {
                    document_id: existing.id,
                    job_id: job_ids.first().cloned().unwrap_or_default(),
                    job_ids,
                    duplicate: true,
                };
                return Ok((receipt, Vec::new()));
            }

            let document = Document {
                id: Uuid::new_v4().to_string(),
                source_ref: submission.source_ref.clone(),
                content_hash: inspection.content_hash.clone(),
                page_count: inspection.page_count,
                classification: submission.classification,
                format: inspection.format,
                mime_type: submission
                    .mime_type
                    .clone()
                    .or_else(|| Some(inspection.mime_type.clone())),
                eligible_voters: submission.eligible_voters,
                status: DocumentStatus::Queued,
                status_reason: None,
                submitted_at: now,
                updated_at: now,
            };
            document_repo::insert(tx, &document, &submission.content)?;

            let jobs: Vec<WorkerJob> = if split {
                (1..=document.page_count)
                    .map(|page| WorkerJob::page(&document.id, page, submission.priority, now))
                    .collect()
            } else {
                vec![WorkerJob::document(&document.id, submission.priority, now)]
            };
            for job in &jobs {
                job_repo::insert(tx, job)?;
            }

            let detail = format!(
                "{} {} page(s), {} job(s)",
                document.format,
                document.page_count,
                jobs.len()
            );
            audit_repo::record(
                tx,
                &NewAuditEntry {
                    entity: "document",
                    entity_id: &document.id,
                    actor: "intake",
                    action: "submitted",
                    from_state: None,
                    to_state: Some(DocumentStatus::Queued.as_str()),
                    detail: Some(&detail),
                },
                now,
            )?;

            let job_ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
            let receipt = SubmissionReceipt {
                document_id: document.id,
                job_id: job_ids.first().cloned().unwrap_or_default(),
                job_ids,
                duplicate: false,
            };
            Ok((receipt, jobs))
        })?;

        if receipt.duplicate {
            info!(
                "Document {} already known by content hash; returning existing jobs",
                receipt.document_id
            );
        } else {
            info!(
                "Queued document {} ({} job(s))",
                receipt.document_id,
                queued.len()
            );
        }

        for job in queued {
            self.ctx.progress.start_job(&job.id, &job.document_id, job.page);
            self.ctx.queue.push(job);
        }

        Ok(receipt)
    }

    /// Queues a re-read of one field. The result is appended as a correction.
    pub fn reread_cell(
        &self,
        document_id: &str,
        page: u32,
        field_key: &str,
        priority: JobPriority,
    ) -> Result<String, PipelineError> {
        let now = self.now();
        let job = self.ctx.db.with_tx(|tx| -> Result<_, PipelineError> {
            if field_repo::find_by_key(tx, document_id, page, field_key)?.is_none() {
                return Err(PipelineError::FieldNotFound {
                    document_id: document_id.to_string(),
                    page,
                    key: field_key.to_string(),
                });
            }
            let job = WorkerJob::cell(document_id, page, field_key, priority, now);
            job_repo::insert(tx, &job)?;
            Ok(job)
        })?;

        let id = job.id.clone();
        self.ctx.progress.start_job(&job.id, &job.document_id, job.page);
        self.ctx.queue.push(job);
        Ok(id)
    }

    /// Puts jobs interrupted by a previous process back on the queue.
    pub fn recover(&self) -> Result<usize, PipelineError> {
        let jobs = self.ctx.db.with_tx(|tx| -> Result<_, DatabaseError> {
            let reset = job_repo::reset_running(tx)?;
            if reset > 0 {
                warn!("Reset {} job(s) left running by a previous process", reset);
            }
            job_repo::list_by_status(tx, JobStatus::Queued)
        })?;

        let count = jobs.len();
        for job in jobs {
            self.ctx.queue.push(job);
        }
        if count > 0 {
            info!("Recovered {} queued job(s)", count);
        }
        Ok(count)
    }

    /// The document's extraction in the current payload shape, with reviewer
    /// and re-read corrections applied.
    pub fn payload(&self, document_id: &str) -> Result<PayloadV2, PipelineError> {
        let document = self.load_document(document_id)?;
        let fields = self.ctx.review.effective_fields(&document.id)?;
        let (cross, findings) = self.ctx.db.with_conn(|conn| {
            Ok((
                field_repo::load_cross_validation(conn, &document.id)?,
                finding_repo::list_for_document(conn, &document.id)?,
            ))
        })?;
        Ok(PayloadV2::from_document(
            &document.id,
            &fields,
            cross.as_ref(),
            &findings,
        ))
    }

    // ─── Execution ──────────────────────────────────────────────────────────

    /// Claims and runs one job, reporting progress on the broadcast channel.
    ///
    /// Returns `None` when another worker already holds the job.
    pub fn execute(
        &self,
        job: WorkerJob,
        worker_id: usize,
    ) -> Result<Option<JobOutcome>, PipelineError> {
        let progress =
            BroadcastProgress::new(self.ctx.progress.track(&job.id, &job.document_id, job.page));
        self.execute_with(job, worker_id, &progress)
    }

    pub fn execute_with(
        &self,
        job: WorkerJob,
        worker_id: usize,
        progress: &dyn ProgressReporter,
    ) -> Result<Option<JobOutcome>, PipelineError> {
        let started = Instant::now();
        let now = self.now();

        let claimed = self.ctx.db.with_tx(|tx| -> Result<_, DatabaseError> {
            if !job_repo::mark_running(tx, &job.id, worker_id, now)? {
                return Ok(None);
            }
            job_repo::find_by_id(tx, &job.id)
        })?;
        let Some(job) = claimed else {
            debug!("Job {} is no longer queued; skipping", job.id);
            return Ok(None);
        };

        let _pipeline_span = info_span!("pipeline",
            job_id = %job.id,
            document_id = %job.document_id,
            kind = %job.kind,
            attempt = job.attempts,
            worker_id,
        )
        .entered();

        let mut run = PipelineContext::new(job);
        let result = match run.job.kind {
            JobKind::Document => self.run_document(&mut run, progress),
            JobKind::Page => self.run_page(&mut run, progress),
            JobKind::Cell => self.run_cell(&mut run, progress),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(()) => self.finish_success(&run, worker_id, duration_ms, progress)?,
            Err(e) => self.finish_failure(&run, e, worker_id, duration_ms, progress)?,
        };
        Ok(Some(outcome))
    }

    fn finish_success(
        &self,
        run: &PipelineContext,
        worker_id: usize,
        duration_ms: u64,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, PipelineError> {
        let now = self.now();
        self.ctx.db.with_conn(|conn| {
            job_repo::mark_completed(conn, &run.job.id, &run.summary(), now, duration_ms)
        })?;

        progress.report(ProgressEvent::Completed {
            outcome: run.document_status.map(|s| s.as_str().to_string()),
        });
        info!("Job {} completed in {} ms", run.job.id, duration_ms);

        Ok(outcome(&run.job, worker_id, JobStatus::Completed, None, duration_ms))
    }

    fn finish_failure(
        &self,
        run: &PipelineContext,
        err: PipelineError,
        worker_id: usize,
        duration_ms: u64,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome, PipelineError> {
        let now = self.now();
        let job = &run.job;
        let code = err.code();
        let message = err.to_string();
        let max_attempts = self.ctx.config.workers.max_job_attempts;

        if err.is_retryable() && job.attempts < max_attempts {
            let delay = err.retry_delay(
                &self.ctx.config.provider.retry,
                job.attempts.saturating_sub(1),
            );
            self.ctx.db.with_tx(|tx| -> Result<_, DatabaseError> {
                job_repo::requeue(tx, &job.id, code, &message)?;
                if job.kind == JobKind::Document {
                    document_repo::transition(
                        tx,
                        &job.document_id,
                        &[DocumentStatus::Processing],
                        DocumentStatus::Queued,
                        Some(code),
                        now,
                    )?;
                }
                Ok(())
            })?;

            warn!(
                "Job {} attempt {}/{} failed ({}: {}); requeued in {:?}",
                job.id, job.attempts, max_attempts, code, message, delay
            );
            progress.report(ProgressEvent::phase(
                JobPhase::Queued,
                format!("Retrying in {:?} after {}", delay, code),
            ));

            let mut retry = job.clone();
            retry.status = JobStatus::Queued;
            retry.worker_id = None;
            self.ctx.queue.push_delayed(retry, delay);

            let mut result = outcome(job, worker_id, JobStatus::Queued, Some(&err), duration_ms);
            result.requeued = true;
            return Ok(result);
        }

        let reason = format!("{}: {}", code, message);
        self.ctx.db.with_tx(|tx| -> Result<_, DatabaseError> {
            job_repo::mark_failed(tx, &job.id, code, &message, now, duration_ms)?;
            if job.kind != JobKind::Cell {
                let failed = document_repo::transition(
                    tx,
                    &job.document_id,
                    &[
                        DocumentStatus::Queued,
                        DocumentStatus::Processing,
                        DocumentStatus::Extracted,
                        DocumentStatus::Validated,
                    ],
                    DocumentStatus::Failed,
                    Some(&reason),
                    now,
                )?;
                if failed {
                    audit_repo::record(
                        tx,
                        &NewAuditEntry {
                            entity: "document",
                            entity_id: &job.document_id,
                            actor: "pipeline",
                            action: "failed",
                            from_state: None,
                            to_state: Some(DocumentStatus::Failed.as_str()),
                            detail: Some(&reason),
                        },
                        now,
                    )?;
                }
            }
            Ok(())
        })?;

        error!(
            "Job {} failed after {} attempt(s): {}",
            job.id, job.attempts, reason
        );
        progress.report(ProgressEvent::Failed {
            code: code.to_string(),
            error: message,
        });

        Ok(outcome(job, worker_id, JobStatus::Failed, Some(&err), duration_ms))
    }

    // ─── Job kinds ──────────────────────────────────────────────────────────

    fn run_document(
        &self,
        run: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let document = self.load_document(&run.job.document_id)?;
        if document.status.is_settled() {
            debug!("Document {} already {}; nothing to do", document.id, document.status);
            run.skipped = true;
            run.document_status = Some(document.status);
            return Ok(());
        }
        if document.status == DocumentStatus::Validated {
            return self.resume_triage(run, &document, progress);
        }

        // A document left extracted by an interrupted run only needs finalising.
        if document.status != DocumentStatus::Extracted {
            self.transition(
                &document.id,
                &[DocumentStatus::Queued, DocumentStatus::Processing],
                DocumentStatus::Processing,
                None,
            )?;

            let _step = info_span!("extract").entered();
            progress.report(ProgressEvent::phase(
                JobPhase::Extracting,
                format!("Reading {} page(s)", document.page_count),
            ));

            let output = self.read(&document, Vec::new(), Arc::clone(&self.schema))?;
            let now = self.now();
            let fields = self.extractor.extract_fields(&document, &output, now);
            let pages: Vec<ExtractedPage> = (1..=document.page_count)
                .map(|page| page_record(&output, page, page == 1))
                .collect();

            let stored = self.ctx.db.with_tx(|tx| -> Result<_, DatabaseError> {
                let stored = field_repo::insert_fields(tx, &fields)?;
                for page in &pages {
                    field_repo::mark_page_extracted(tx, &document.id, page, now)?;
                }
                document_repo::transition(
                    tx,
                    &document.id,
                    &[DocumentStatus::Processing],
                    DocumentStatus::Extracted,
                    None,
                    now,
                )?;
                Ok(stored)
            })?;

            run.fields_stored = stored;
            run.pages_read = (1..=document.page_count).collect();
            debug!("Stored {} field(s) for document {}", stored, document.id);
        }

        self.finalize(run, progress)
    }

    fn run_page(
        &self,
        run: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let page = run.job.page.ok_or_else(|| invalid_job(&run.job, "page job without page"))?;
        let document = self.load_document(&run.job.document_id)?;
        if document.status.is_settled() {
            run.skipped = true;
            run.document_status = Some(document.status);
            return Ok(());
        }
        if document.status == DocumentStatus::Validated {
            return self.resume_triage(run, &document, progress);
        }
        if page == 0 || page > document.page_count {
            return Err(invalid_job(
                &run.job,
                &format!("page {} outside 1..={}", page, document.page_count),
            ));
        }

        self.transition(
            &document.id,
            &[DocumentStatus::Queued],
            DocumentStatus::Processing,
            None,
        )?;

        let already_read = self
            .ctx
            .db
            .with_conn(|conn| field_repo::extracted_pages(conn, &document.id))?
            .iter()
            .any(|p| p.page == page);

        if !already_read {
            let _step = info_span!("extract", page).entered();
            progress.report(ProgressEvent::phase(
                JobPhase::Extracting,
                format!("Reading page {}", page),
            ));

            let output = self.read(&document, vec![page], Arc::clone(&self.schema))?;
            let now = self.now();
            let mut fields = self.extractor.extract_fields(&document, &output, now);
            fields.retain(|f| f.page == page);
            let record = page_record(&output, page, true);

            run.fields_stored = self.ctx.db.with_tx(|tx| -> Result<_, DatabaseError> {
                let stored = field_repo::insert_fields(tx, &fields)?;
                field_repo::mark_page_extracted(tx, &document.id, &record, now)?;
                Ok(stored)
            })?;
            run.pages_read = vec![page];
        }

        // The job that stores the last page moves the document on and
        // finalises it; the conditional transition picks one winner.
        let now = self.now();
        let complete = self.ctx.db.with_tx(|tx| -> Result<_, DatabaseError> {
            let done = field_repo::extracted_pages(tx, &document.id)?.len() as u32;
            if done < document.page_count {
                return Ok(false);
            }
            document_repo::transition(
                tx,
                &document.id,
                &[DocumentStatus::Queued, DocumentStatus::Processing],
                DocumentStatus::Extracted,
                None,
                now,
            )
        })?;

        if complete {
            self.finalize(run, progress)
        } else {
            run.document_status = Some(self.load_document(&document.id)?.status);
            Ok(())
        }
    }

    fn run_cell(
        &self,
        run: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let page = run.job.page.ok_or_else(|| invalid_job(&run.job, "cell job without page"))?;
        let key = run
            .job
            .field_key
            .clone()
            .ok_or_else(|| invalid_job(&run.job, "cell job without field key"))?;
        let document = self.load_document(&run.job.document_id)?;
        let not_found = || PipelineError::FieldNotFound {
            document_id: document.id.clone(),
            page,
            key: key.clone(),
        };

        let field = self
            .ctx
            .db
            .with_conn(|conn| field_repo::find_by_key(conn, &document.id, page, &key))?
            .ok_or_else(not_found)?;

        let _step = info_span!("reread", field = %key, page).entered();
        progress.report(ProgressEvent::phase(
            JobPhase::Extracting,
            format!("Re-reading {} on page {}", key, page),
        ));

        let spec = self
            .schema
            .fields
            .iter()
            .find(|f| f.key == key)
            .cloned()
            .unwrap_or_else(|| FieldSpec {
                key: key.clone(),
                label: key.clone(),
                page: Some(page),
            });
        let schema = Arc::new(FormSchema { fields: vec![spec] });
        let output = self.read(&document, vec![page], schema)?;

        let cell = output
            .cells
            .iter()
            .filter(|c| c.key == key && c.page == page)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .ok_or_else(not_found)?;
        let normalized = self.extractor.normalizer().normalize(&cell.text);

        let now = self.now();
        let correction = FieldCorrection {
            id: Uuid::new_v4().to_string(),
            field_id: field.id.clone(),
            document_id: document.id.clone(),
            review_item_id: None,
            value: normalized.value,
            mark: normalized.mark.map(|m| m.symbol),
            source: CorrectionSource::Reocr,
            actor: format!("ocr:{}", output.provider),
            note: Some(format!(
                "re-read '{}' at confidence {:.2}",
                cell.text, cell.confidence
            )),
            created_at: now,
        };

        self.ctx.db.with_tx(|tx| -> Result<_, DatabaseError> {
            field_repo::insert_correction(tx, &correction)?;
            audit_repo::record(
                tx,
                &NewAuditEntry {
                    entity: "field",
                    entity_id: &field.id,
                    actor: &correction.actor,
                    action: "reread",
                    from_state: Some(&field.raw_text),
                    to_state: Some(&cell.text),
                    detail: correction.note.as_deref(),
                },
                now,
            )
        })?;

        run.correction_id = Some(correction.id);
        run.pages_read = vec![page];
        Ok(())
    }

    // ─── Finalisation ───────────────────────────────────────────────────────

    /// Cross-validates, validates and triages an extracted document.
    fn finalize(
        &self,
        run: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let document_id = run.job.document_id.clone();

        // Reload: page jobs finalise with fields other jobs stored.
        let (fields, pages) = self.ctx.db.with_conn(|conn| {
            Ok((
                field_repo::list_for_document(conn, &document_id)?,
                field_repo::extracted_pages(conn, &document_id)?,
            ))
        })?;

        let cross = {
            let _step = info_span!("cross_validate").entered();
            progress.report(ProgressEvent::phase(
                JobPhase::CrossValidating,
                "Comparing table code with header",
            ));
            let cross = cross_validate_pages(&fields, &pages);
            debug!(
                "Cross-validation for {}: {} (confidence {:.2})",
                document_id, cross.match_status, cross.confidence
            );
            cross
        };

        let document = self.load_document(&document_id)?;
        let findings = {
            let _step = info_span!("validate").entered();
            progress.report(ProgressEvent::phase(
                JobPhase::Validating,
                format!("Validating {} field(s)", fields.len()),
            ));
            self.engine.validate(&document, &fields, &cross, self.now())
        };

        let now = self.now();
        let won = self.ctx.db.with_tx(|tx| -> Result<_, DatabaseError> {
            if !document_repo::transition(
                tx,
                &document_id,
                &[DocumentStatus::Extracted],
                DocumentStatus::Validated,
                None,
                now,
            )? {
                return Ok(false);
            }
            field_repo::save_cross_validation(tx, &document_id, &cross, now)?;
            finding_repo::insert_findings(tx, &findings)?;
            Ok(true)
        })?;
        if !won {
            debug!("Document {} was finalised by another job", document_id);
            run.document_status = Some(self.load_document(&document_id)?.status);
            return Ok(());
        }

        self.triage(run, &document, &fields, findings, cross, progress)
    }

    /// Finishes a document whose findings were stored by a run that stopped
    /// before routing them.
    fn resume_triage(
        &self,
        run: &mut PipelineContext,
        document: &Document,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let (fields, pages, cross, findings) = self.ctx.db.with_conn(|conn| {
            Ok((
                field_repo::list_for_document(conn, &document.id)?,
                field_repo::extracted_pages(conn, &document.id)?,
                field_repo::load_cross_validation(conn, &document.id)?,
                finding_repo::list_for_document(conn, &document.id)?,
            ))
        })?;
        let cross = cross.unwrap_or_else(|| cross_validate_pages(&fields, &pages));
        warn!(
            "Document {} was left validated; routing {} stored finding(s)",
            document.id,
            findings.len()
        );
        self.triage(run, document, &fields, findings, cross, progress)
    }

    /// Raises incidents and the review item for a validated document, then
    /// settles it. Safe to repeat: incidents dedupe in the store and a
    /// document keeps its first review item.
    fn triage(
        &self,
        run: &mut PipelineContext,
        document: &Document,
        fields: &[ExtractedField],
        findings: Vec<ValidationFinding>,
        cross: CrossValidationResult,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let _step = info_span!("triage").entered();
        progress.report(ProgressEvent::phase(JobPhase::Triaging, "Routing findings"));
        let plan = triage::plan(
            document,
            fields,
            &findings,
            &cross,
            self.ctx.config.incidents.min_severity,
        );

        for incident in plan.incidents {
            let created = self.ctx.incidents.create(incident, true)?;
            run.incident_ids.push(created.incident.id);
        }
        if let Some(item) = plan.review {
            run.review_item_id = Some(self.ctx.review.enqueue_once(item)?.id);
        }

        let (status, reason) = if run.incident_ids.is_empty() {
            (DocumentStatus::Accepted, None)
        } else {
            (
                DocumentStatus::IncidentRaised,
                Some(format!("{} incident(s)", run.incident_ids.len())),
            )
        };
        if !self.transition(
            &document.id,
            &[DocumentStatus::Validated],
            status,
            reason.as_deref(),
        )? {
            debug!("Document {} was settled by another job", document.id);
        }

        info!(
            "Document {} {}: {} failed finding(s), review item {}",
            document.id,
            status,
            findings.iter().filter(|f| f.failed()).count(),
            run.review_item_id.as_deref().unwrap_or("none")
        );

        run.cross = Some(cross);
        run.findings = findings;
        run.document_status = Some(self.load_document(&document.id)?.status);
        Ok(())
    }

    // ─── Helpers ────────────────────────────────────────────────────────────

    fn load_document(&self, id: &str) -> Result<Document, PipelineError> {
        self.ctx
            .db
            .with_conn(|conn| document_repo::find_by_id(conn, id))?
            .ok_or_else(|| PipelineError::DocumentNotFound(id.to_string()))
    }

    fn transition(
        &self,
        id: &str,
        from: &[DocumentStatus],
        to: DocumentStatus,
        reason: Option<&str>,
    ) -> Result<bool, PipelineError> {
        let now = self.now();
        Ok(self
            .ctx
            .db
            .with_conn(|conn| document_repo::transition(conn, id, from, to, reason, now))?)
    }

    fn read(
        &self,
        document: &Document,
        pages: Vec<u32>,
        schema: Arc<FormSchema>,
    ) -> Result<ProviderOutput, PipelineError> {
        let content = self
            .ctx
            .db
            .with_conn(|conn| document_repo::load_content(conn, &document.id))?
            .ok_or_else(|| PipelineError::ContentMissing(document.id.clone()))?;

        let request = OcrRequest {
            document_id: document.id.clone(),
            content_hash: document.content_hash.clone(),
            format: document.format,
            content: Arc::from(content),
            pages,
            schema,
            timeout: self.ctx.config.provider.timeout(),
        };
        Ok(self.guard.call(&request)?)
    }
}

fn cross_validate_pages(fields: &[ExtractedField], pages: &[ExtractedPage]) -> CrossValidationResult {
    let raw_code = pages.iter().find_map(|p| p.raw_code.as_deref());
    cross_validate(decode(raw_code), OcrHeader::from_fields(fields))
}

fn page_record(output: &ProviderOutput, page: u32, with_code: bool) -> ExtractedPage {
    ExtractedPage {
        page,
        provider: output.provider.clone(),
        provider_confidence: output.provider_confidence,
        raw_code: if with_code { output.code.clone() } else { None },
    }
}

fn invalid_job(job: &WorkerJob, reason: &str) -> PipelineError {
    PipelineError::InvalidJob {
        job_id: job.id.clone(),
        reason: reason.to_string(),
    }
}

fn outcome(
    job: &WorkerJob,
    worker_id: usize,
    status: JobStatus,
    err: Option<&PipelineError>,
    duration_ms: u64,
) -> JobOutcome {
    JobOutcome {
        job_id: job.id.clone(),
        document_id: job.document_id.clone(),
        kind: job.kind,
        worker_id,
        status,
        requeued: false,
        error_code: err.map(|e| e.code().to_string()),
        error: err.map(|e| e.to_string()),
        duration_ms,
    }
}
