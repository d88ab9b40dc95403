use std::sync::Arc;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::Receiver;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::pipeline::context::RunContext;
use crate::source::csv::{Header, Row};
use crate::store::{EntityFactory, Schema, WriteMode, WriteSink};

/// How [`Dispatcher::run`] stopped taking rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drain {
    /// The channel was closed and empty: every row sent was taken.
    Exhausted,
    /// Cancellation stopped the loop with rows possibly still unsent or queued.
    Cancelled,
}

/// Fans rows out to write tasks, never more than `max_concurrency` at once.
pub struct Dispatcher {
    worker: Worker,
    max_concurrency: usize,
}

#[derive(Clone)]
struct Worker {
    sink: Arc<dyn WriteSink>,
    factory: Arc<dyn EntityFactory>,
    schema: Arc<Schema>,
    header: Arc<Header>,
    mode: WriteMode,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn WriteSink>,
        factory: Arc<dyn EntityFactory>,
        schema: Arc<Schema>,
        header: Arc<Header>,
    ) -> Self {
        Self {
            worker: Worker {
                sink,
                factory,
                schema,
                header,
                mode: WriteMode::Validate,
            },
            max_concurrency: crate::pipeline::config::DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn mode(mut self, mode: WriteMode) -> Self {
        self.worker.mode = mode;
        self
    }

    /// Drain `rows`, writing each one, and return the run's first fatal error.
    ///
    /// A slot is claimed before a row is taken off the channel, so a saturated
    /// pool stops pulling rows and the producer blocks on its send. Once the
    /// run is cancelled no new row is accepted; tasks already launched are
    /// always joined before returning.
    pub async fn run(&self, mut rows: Receiver<Result<Row>>, ctx: Arc<RunContext>) -> Result<Drain> {
        let slots = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let cancel = ctx.cancel_token().clone();
        let mut drain = Drain::Exhausted;

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "bulkload.cancelled", stage = "dispatcher", where_ = "acquire", "bulkload.cancelled");
                    drain = drain_after_cancel(&mut rows);
                    break
                },
                permit = slots.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            let msg = tokio::select! {
                _ = cancel.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "bulkload.cancelled", stage = "dispatcher", where_ = "recv", "bulkload.cancelled");
                    drain = drain_after_cancel(&mut rows);
                    break
                },
                msg = rows.recv() => msg,
            };
            let Some(event) = msg else { break };

            let row = match event {
                Ok(row) => row,
                Err(err) => {
                    ctx.fail(err);
                    break;
                }
            };
            ctx.mark_observed();

            let worker = self.worker.clone();
            let task_ctx = Arc::clone(&ctx);
            tasks.spawn(async move {
                let _permit = permit;
                worker.write_row(row, &task_ctx).await;
            });

            reap_finished(&mut tasks, &ctx);
        }

        // Unblocks a producer still waiting to send.
        drop(rows);

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                ctx.fail(Error::Join(err));
            }
        }

        match ctx.take_error() {
            Some(err) => Err(err),
            None => Ok(drain),
        }
    }
}

/// A cancel that lands after the producer already closed an empty channel
/// interrupted nothing.
fn drain_after_cancel(rows: &mut Receiver<Result<Row>>) -> Drain {
    match rows.try_recv() {
        Err(TryRecvError::Disconnected) => Drain::Exhausted,
        _ => Drain::Cancelled,
    }
}

/// Non-blocking drain of tasks that already completed.
fn reap_finished(tasks: &mut JoinSet<()>, ctx: &RunContext) {
    while let Some(joined) = tasks.try_join_next() {
        if let Err(err) = joined {
            ctx.fail(Error::Join(err));
        }
    }
}

impl Worker {
    async fn write_row(&self, row: Row, ctx: &RunContext) {
        if ctx.is_cancelled() {
            #[cfg(feature = "tracing")]
            tracing::event!(tracing::Level::DEBUG, event = "bulkload.cancelled", stage = "worker", where_ = "start", row = row.position(), "bulkload.cancelled");
            return;
        }

        let mut record = self.factory.new_record(&self.schema, &self.header);
        record.assign_row(self.header.columns(), row.fields());

        match self.sink.write(record, self.mode).await {
            Ok(()) => ctx.mark_processed(),
            Err(err) if self.sink.is_duplicate(&err) => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "bulkload.row.duplicate", row = row.position(), error = %err, "bulkload.row.duplicate");
                ctx.mark_processed();
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::WARN, event = "bulkload.worker.failed", row = row.position(), error = %err, "bulkload.worker.failed");
                ctx.fail(Error::Write {
                    row: row.position(),
                    source: err,
                });
            }
        }
    }
}
