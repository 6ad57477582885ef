//! Explicitly constructed application context.
//!
//! Everything a pipeline or agent instance shares is built here and passed
//! down. Two contexts never share a breaker, queue or store unless the caller
//! hands them the same database.

use std::sync::Arc;

use crate::broadcast::{AlertBroadcaster, JobProgressBroadcaster};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::db::Database;
use crate::incident::IncidentStore;
use crate::provider::{CircuitBreaker, OcrProvider, ProviderGuard};
use crate::review::ReviewQueue;
use crate::worker::JobQueue;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: Database,
    pub clock: SharedClock,
    pub provider: Arc<dyn OcrProvider>,
    pub breaker: Arc<CircuitBreaker>,
    pub queue: Arc<JobQueue>,
    pub review: ReviewQueue,
    pub incidents: IncidentStore,
    pub progress: JobProgressBroadcaster,
    pub alerts: AlertBroadcaster,
}

impl AppContext {
    pub fn new(
        config: Config,
        db: Database,
        clock: SharedClock,
        provider: Arc<dyn OcrProvider>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.provider.breaker.failure_threshold,
            config.provider.breaker.cooldown(),
            Arc::clone(&clock),
        ));
        let review = ReviewQueue::new(db.clone(), Arc::clone(&clock))
            .with_claim_ttl(chrono::Duration::minutes(config.review.claim_ttl_minutes))
            .with_marks(config.extraction.marks.clone());
        let incidents = IncidentStore::new(db.clone(), Arc::clone(&clock));
        let progress = JobProgressBroadcaster::new(256, Arc::clone(&clock));

        Self {
            config: Arc::new(config),
            db,
            clock,
            provider,
            breaker,
            queue: Arc::new(JobQueue::new()),
            review,
            incidents,
            progress,
            alerts: AlertBroadcaster::default(),
        }
    }

    /// Provider access with this context's timeout policy, retries and breaker.
    pub fn guard(&self) -> ProviderGuard {
        ProviderGuard::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.breaker),
            self.config.provider.retry.clone(),
        )
    }
}
