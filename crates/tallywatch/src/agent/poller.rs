//! Cancellable periodic tasks.
//!
//! Each poller owns a thread running a current-thread tokio runtime. The loop
//! waits for the next interval tick, then a random jitter, then runs the task.
//! Cancellation is a `watch` channel observed at both waits, so a stopped
//! poller never starts another run.

use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::rules::Concern;

pub struct PollerHandle {
    concern: Concern,
    cancel: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn concern(&self) -> Concern {
        self.concern
    }

    /// Requests the loop to stop. A run already in progress completes.
    pub fn cancel(&self) {
        // Errors only when the loop already exited.
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    pub fn join(mut self) {
        self.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("{} poller thread panicked", self.concern);
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        let _ = self.cancel.send(true);
    }
}

/// Starts a poller running `task` every `interval` plus up to `jitter`.
/// The first run happens after the first jitter delay, without waiting a
/// full interval.
pub fn spawn<F>(
    concern: Concern,
    interval: Duration,
    jitter: Duration,
    mut task: F,
) -> std::io::Result<PollerHandle>
where
    F: FnMut() + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (cancel, mut cancelled) = watch::channel(false);
    let interval = interval.max(Duration::from_millis(1));

    let thread = std::thread::Builder::new()
        .name(format!("tallywatch-agent-{concern}"))
        .spawn(move || {
            runtime.block_on(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                log::debug!("{concern} poller started (every {interval:?})");

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = cancelled.changed() => break,
                    }
                    let delay = jitter_delay(jitter);
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancelled.changed() => break,
                        }
                    }
                    if *cancelled.borrow() {
                        break;
                    }
                    task();
                }

                log::debug!("{concern} poller stopped");
            });
        })?;

    Ok(PollerHandle {
        concern,
        cancel,
        thread: Some(thread),
    })
}

/// A uniformly random delay in `0..=max`, at millisecond resolution.
pub fn jitter_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    if let Err(e) = getrandom::fill(&mut bytes) {
        log::warn!("No randomness for poll jitter: {e}");
        return Duration::ZERO;
    }
    Duration::from_millis(u64::from_le_bytes(bytes) % (max_ms + 1))
}
