use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::pipeline::Pipeline;
use crate::worker::job::JobOutcome;
use crate::worker::queue::JobQueue;

/// Fixed-size pool of OS threads draining the context's job queue.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    outcome_receiver: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn start(pipeline: Pipeline, worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let queue = Arc::clone(&pipeline.context().queue);
        let poll_interval = pipeline.context().config.workers.poll_interval();
        let (outcome_sender, outcome_receiver) = unbounded::<JobOutcome>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                pipeline: pipeline.clone(),
                queue: Arc::clone(&queue),
                outcomes: outcome_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                poll_interval,
            };

            let handle = thread::Builder::new()
                .name(format!("tallywatch-worker-{}", worker_id))
                .spawn(move || worker.run())
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            queue,
            outcome_receiver,
            workers,
            shutdown,
        })
    }

    pub fn try_recv_outcome(&self) -> Option<JobOutcome> {
        self.outcome_receiver.try_recv().ok()
    }

    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.outcome_receiver.recv_timeout(timeout).ok()
    }

    /// Stops claiming new jobs. Jobs already running finish first.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
        self.queue.close();
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct Worker {
    id: usize,
    pipeline: Pipeline,
    queue: Arc<JobQueue>,
    outcomes: Sender<JobOutcome>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            let Some(job) = self.queue.claim(self.poll_interval) else {
                if self.queue.is_closed() {
                    break;
                }
                continue;
            };

            debug!("Worker {} claimed job {} ({})", self.id, job.id, job.kind);
            match self.pipeline.execute(job, self.id) {
                Ok(Some(outcome)) => {
                    if self.outcomes.send(outcome).is_err() {
                        debug!("Worker {} outcome receiver dropped", self.id);
                    }
                }
                Ok(None) => {}
                Err(e) => error!("Worker {} could not record job result: {}", self.id, e),
            }
        }

        debug!("Worker {} stopped", self.id);
    }
}
