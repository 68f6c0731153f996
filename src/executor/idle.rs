//! Idle-driven executor with exponential backoff
//!
//! Each scheduling cycle goes: post to the main loop, register a fresh one-shot
//! idle handler, and once the loop is idle hand the unit to the serial
//! background thread with a delay of `initial_delay * min(2^attempts, cap)`.
//! The cap keeps the product inside `u64` milliseconds.

use super::{MainLoopHandle, RetryOutcome, Retryable, WatchExecutor};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Name of the serial background thread that runs liveness checks
pub const BACKGROUND_THREAD_NAME: &str = "LeakWatch-Snapshot";

/// Delay before the run that follows `failed_attempts` consecutive retries.
///
/// Never overflows: the backoff factor is clamped to `u64::MAX / initial_ms`.
pub fn backoff_delay(initial: Duration, failed_attempts: u32) -> Duration {
    let initial_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
    if initial_ms == 0 {
        return Duration::ZERO;
    }

    let max_backoff_factor = u64::MAX / initial_ms;
    let factor = 2u64
        .checked_pow(failed_attempts)
        .unwrap_or(u64::MAX)
        .min(max_backoff_factor);

    Duration::from_millis(initial_ms * factor)
}

struct DelayedJob {
    delay: Duration,
    job: Box<dyn FnOnce() + Send>,
}

struct Inner {
    main: MainLoopHandle,
    background: mpsc::UnboundedSender<DelayedJob>,
    initial_delay: Duration,
}

/// [`WatchExecutor`] that waits for the main loop to be idle, then runs the
/// unit on a serial background thread after a backoff delay.
#[derive(Clone)]
pub struct IdleWatchExecutor {
    inner: Arc<Inner>,
}

impl IdleWatchExecutor {
    /// Create an executor bound to `main`, starting the background thread.
    pub fn new(main: MainLoopHandle, initial_delay: Duration) -> std::io::Result<Self> {
        let background = spawn_background_thread()?;
        Ok(Self {
            inner: Arc::new(Inner {
                main,
                background,
                initial_delay,
            }),
        })
    }

    pub fn initial_delay(&self) -> Duration {
        self.inner.initial_delay
    }
}

impl WatchExecutor for IdleWatchExecutor {
    fn execute(&self, retryable: Box<dyn Retryable>) {
        if self.inner.main.is_loop_thread() {
            wait_for_idle(self.inner.clone(), retryable, 0);
        } else {
            post_wait_for_idle(self.inner.clone(), retryable, 0);
        }
    }
}

fn post_wait_for_idle(inner: Arc<Inner>, retryable: Box<dyn Retryable>, failed_attempts: u32) {
    let main = inner.main.clone();
    if !main.post(move || wait_for_idle(inner, retryable, failed_attempts)) {
        warn!(failed_attempts, "Main loop stopped, dropping liveness check");
    }
}

/// Must run on the main loop thread.
fn wait_for_idle(inner: Arc<Inner>, retryable: Box<dyn Retryable>, failed_attempts: u32) {
    let main = inner.main.clone();
    let mut pending = Some(retryable);
    let registered = main.add_idle_handler(move || {
        if let Some(retryable) = pending.take() {
            post_to_background_with_delay(inner.clone(), retryable, failed_attempts);
        }
        false
    });
    if !registered {
        warn!(failed_attempts, "Main loop stopped before idle handler registration");
    }
}

fn post_to_background_with_delay(
    inner: Arc<Inner>,
    retryable: Box<dyn Retryable>,
    failed_attempts: u32,
) {
    let delay = backoff_delay(inner.initial_delay, failed_attempts);
    trace!(failed_attempts, delay_ms = delay.as_millis() as u64, "Scheduling liveness check");

    let background = inner.background.clone();
    let job = DelayedJob {
        delay,
        job: Box::new(move || {
            if retryable.run() == RetryOutcome::Retry {
                let next = failed_attempts.saturating_add(1);
                debug!(attempts = next, "Liveness check asked to retry");
                post_wait_for_idle(inner, retryable, next);
            }
        }),
    };

    if background.send(job).is_err() {
        error!("Background thread is gone, dropping liveness check");
    }
}

/// Start the serial background thread. Jobs run one at a time on a
/// current-thread runtime, so checks never overlap.
fn spawn_background_thread() -> std::io::Result<mpsc::UnboundedSender<DelayedJob>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DelayedJob>();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    thread::Builder::new()
        .name(BACKGROUND_THREAD_NAME.to_string())
        .spawn(move || {
            runtime.block_on(async move {
                while let Some(DelayedJob { delay, job }) = rx.recv().await {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        job();
                    });
                }
            });
            debug!("Background thread stopped");
        })?;

    Ok(tx)
}
