use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::Result;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::config::ProgressOutput;
use crate::pipeline::context::RunContext;

/// How a run ended, as far as the final progress line is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    Failed,
    Interrupted,
}

/// Background task printing `Processed: N rows | R rows/sec` every interval.
///
/// The task stops when [`ProgressReporter::finish`] is called or the run is
/// cancelled, whichever comes first. `finish` joins it before writing the
/// terminal line, so no tick can land after that line.
pub struct ProgressReporter {
    ctx: Arc<RunContext>,
    output: ProgressOutput,
    done: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn spawn(ctx: Arc<RunContext>, every: Duration, output: ProgressOutput) -> Self {
        let done = CancelToken::new();
        let handle = tokio::spawn(tick(
            Arc::clone(&ctx),
            every,
            output.clone(),
            done.clone(),
        ));
        Self {
            ctx,
            output,
            done,
            handle: Some(handle),
        }
    }

    /// Stop ticking and write the final line for `outcome`.
    pub async fn finish(mut self, outcome: Outcome) -> Result<()> {
        self.done.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }

        let count = self.ctx.processed();
        match outcome {
            Outcome::Finished => {
                let rps = self.ctx.rows_per_sec();
                write_line(
                    &self.output,
                    format_args!("\rProcessed: {count} rows | {rps:.1} rows/sec (finished)\n"),
                );
                write_line(&self.output, format_args!("Import completed successfully.\n"));
            }
            Outcome::Failed => {
                write_line(&self.output, format_args!("\rProcessed: {count} rows (failed)\n"));
            }
            Outcome::Interrupted => {
                write_line(
                    &self.output,
                    format_args!("\rProcessed: {count} rows (interrupted)\n"),
                );
            }
        }
        Ok(())
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

async fn tick(ctx: Arc<RunContext>, every: Duration, output: ProgressOutput, done: CancelToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let cancel = ctx.cancel_token().clone();

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = cancel.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "bulkload.cancelled", stage = "progress", where_ = "tick", "bulkload.cancelled");
                break
            },
            _ = ticker.tick() => {
                let count = ctx.processed();
                let rps = ctx.rows_per_sec();
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::TRACE, event = "bulkload.progress", processed = count, rows_per_sec = rps, "bulkload.progress");
                write_line(&output, format_args!("\rProcessed: {count} rows | {rps:.1} rows/sec"));
            }
        }
    }
}

fn write_line(output: &ProgressOutput, line: fmt::Arguments<'_>) {
    if let Err(_err) = output.emit(line) {
        #[cfg(feature = "tracing")]
        tracing::event!(tracing::Level::WARN, error = %_err, "failed to write progress line");
    }
}
