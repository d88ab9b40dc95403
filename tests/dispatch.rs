use std::sync::Arc;

use bulkload::error::{Error, Result};
use bulkload::pipeline::cancel::CancelToken;
use bulkload::pipeline::context::RunContext;
use bulkload::pipeline::dispatch::{Dispatcher, Drain};
use bulkload::source::csv::{Header, Row};
use bulkload::store::{Schema, WriteMode};
use tokio::sync::mpsc;

mod common;
use common::TestSink;

fn dispatcher(sink: Arc<TestSink>) -> Dispatcher {
    Dispatcher::new(
        sink.clone(),
        sink,
        Arc::new(Schema::new("things")),
        Arc::new(Header::new(["id", "name"])),
    )
    .max_concurrency(2)
    .mode(WriteMode::SkipValidation)
}

fn row(position: u64) -> Row {
    Row::new(position, vec![position.to_string(), format!("row-{position}")])
}

#[tokio::test]
async fn drains_channel_until_closed() -> Result<()> {
    let sink = Arc::new(TestSink::new());
    let ctx = RunContext::new(CancelToken::new());
    let (tx, rx) = mpsc::channel(4);

    let producer = tokio::spawn(async move {
        for i in 1..=10 {
            tx.send(Ok(row(i))).await.unwrap();
        }
    });

    let drain = dispatcher(sink.clone()).run(rx, ctx.clone()).await?;
    producer.await?;

    assert_eq!(drain, Drain::Exhausted);
    assert_eq!(ctx.processed(), 10);
    assert_eq!(ctx.observed(), 10);
    assert!(sink.modes().iter().all(|m| *m == WriteMode::SkipValidation));
    Ok(())
}

#[tokio::test]
async fn stream_error_in_channel_becomes_the_run_error() {
    let sink = Arc::new(TestSink::new());
    let ctx = RunContext::new(CancelToken::new());
    let (tx, rx) = mpsc::channel(4);

    tx.send(Ok(row(1))).await.unwrap();
    tx.send(Err(Error::config("stand-in for a parse failure")))
        .await
        .unwrap();
    tx.send(Ok(row(3))).await.unwrap();

    let err = dispatcher(sink.clone()).run(rx, ctx.clone()).await.unwrap_err();

    assert!(matches!(err, Error::Config { .. }), "{err:?}");
    assert!(ctx.is_cancelled());
    assert_eq!(ctx.observed(), 1);
    assert!(ctx.processed() <= ctx.observed());
    drop(tx);
}

#[tokio::test]
async fn returns_immediately_when_already_cancelled() -> Result<()> {
    let sink = Arc::new(TestSink::new());
    let cancel = CancelToken::new();
    cancel.cancel();
    let ctx = RunContext::new(cancel);
    let (tx, rx) = mpsc::channel(1);

    tx.send(Ok(row(1))).await.unwrap();

    let drain = dispatcher(sink.clone()).run(rx, ctx).await?;

    assert_eq!(drain, Drain::Cancelled);
    assert_eq!(sink.calls(), 0);
    // Receiver is gone, so a late producer sees a closed channel instead of blocking.
    assert!(tx.send(Ok(row(1))).await.is_err());
    Ok(())
}

#[tokio::test]
async fn cancel_after_the_channel_is_drained_is_not_an_interruption() -> Result<()> {
    let sink = Arc::new(TestSink::new());
    let cancel = CancelToken::new();
    let ctx = RunContext::new(cancel.clone());
    let (tx, rx) = mpsc::channel(1);
    drop(tx);
    cancel.cancel();

    let drain = dispatcher(sink.clone()).run(rx, ctx.clone()).await?;

    assert_eq!(drain, Drain::Exhausted);
    assert_eq!(ctx.observed(), 0);
    Ok(())
}
