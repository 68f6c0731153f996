//! Retry scheduling for liveness checks
//!
//! A [`WatchExecutor`] is in charge of running a [`Retryable`] at some point in
//! the future, and running it again later when it asks to be retried.
//!
//! - [`IdleWatchExecutor`]: waits for the primary [`MainLoop`] to go idle, then
//!   runs the unit on a serial background thread with exponential backoff.
//! - [`NoopWatchExecutor`]: drops everything (disabled mode).

mod idle;
mod main_loop;

pub use idle::{backoff_delay, IdleWatchExecutor, BACKGROUND_THREAD_NAME};
pub use main_loop::{MainLoop, MainLoopHandle};

/// Outcome of one run of a [`Retryable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Work finished; do not schedule again
    Done,
    /// Run again after a longer delay
    Retry,
}

/// A unit of work that may ask to be re-run.
///
/// Implementations must tolerate being invoked any number of times.
pub trait Retryable: Send {
    fn run(&self) -> RetryOutcome;
}

impl<F> Retryable for F
where
    F: Fn() -> RetryOutcome + Send,
{
    fn run(&self) -> RetryOutcome {
        self()
    }
}

/// Schedules retryable work off the calling thread
pub trait WatchExecutor: Send + Sync {
    /// Submit `retryable`. Must return immediately and never run it inline.
    fn execute(&self, retryable: Box<dyn Retryable>);
}

/// Executor that silently drops all submitted work
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWatchExecutor;

impl WatchExecutor for NoopWatchExecutor {
    fn execute(&self, _retryable: Box<dyn Retryable>) {}
}
