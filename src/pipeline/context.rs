use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::pipeline::cancel::CancelToken;

/// State shared by every task of a single import run.
///
/// Counters only ever grow, the clock is captured once, and the error slot
/// accepts exactly one value. Nothing here is process-global, so independent
/// runs never observe each other.
#[derive(Debug)]
pub struct RunContext {
    processed: AtomicU64,
    observed: AtomicU64,
    started: Instant,
    cancel: CancelToken,
    failed: AtomicBool,
    error: Mutex<Option<Error>>,
}

impl RunContext {
    pub fn new(cancel: CancelToken) -> Arc<Self> {
        Arc::new(Self {
            processed: AtomicU64::new(0),
            observed: AtomicU64::new(0),
            started: Instant::now(),
            cancel,
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
        })
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Rows written or tolerated as duplicates so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Rows the dispatcher accepted from the channel.
    pub fn observed(&self) -> u64 {
        self.observed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_observed(&self) {
        self.observed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `processed / elapsed`, or 0 when no time has passed.
    pub fn rows_per_sec(&self) -> f64 {
        rate(self.processed(), self.elapsed())
    }

    /// Record a fatal error and cancel the run.
    ///
    /// Only the first caller stores its error; later errors are dropped and
    /// `false` is returned.
    pub fn fail(&self, err: Error) -> bool {
        if self
            .failed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::event!(tracing::Level::DEBUG, event = "bulkload.error.discarded", error = %err, "bulkload.error.discarded");
            return false;
        }

        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        self.cancel.cancel();
        true
    }

    pub(crate) fn take_error(&self) -> Option<Error> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub(crate) fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let ctx = RunContext::new(CancelToken::new());
        assert!(ctx.fail(Error::config("first")));
        assert!(!ctx.fail(Error::config("second")));
        assert!(ctx.is_cancelled());

        let err = ctx.take_error().expect("error stored");
        assert!(matches!(err, Error::Config { ref reason } if reason == "first"));
    }

    #[test]
    fn rate_is_zero_without_elapsed_time() {
        assert_eq!(rate(10, Duration::ZERO), 0.0);
        assert_eq!(rate(10, Duration::from_secs(2)), 5.0);
    }
}
