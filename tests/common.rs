#![allow(dead_code)]

use std::io::Write;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bulkload::pipeline::config::{ImportConfig, ProgressOutput};
use bulkload::record::Record;
use bulkload::store::{
    EntityFactory, Schema, SchemaNotFound, SchemaResolver, WriteError, WriteMode, WriteSink,
};
use tokio::io::{AsyncRead, ReadBuf};

/// Sink that records what it saw and how many writes overlapped.
#[derive(Default)]
pub struct TestSink {
    delay: Duration,
    fail_ids: Vec<String>,
    duplicate_ids: Vec<String>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    modes: Mutex<Vec<WriteMode>>,
    records: Mutex<Vec<Record>>,
}

impl TestSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Writes whose `id` field equals `id` fail fatally.
    pub fn fail_on(mut self, id: impl Into<String>) -> Self {
        self.fail_ids.push(id.into());
        self
    }

    /// Writes whose `id` field equals `id` report a uniqueness conflict.
    pub fn duplicate_on(mut self, id: impl Into<String>) -> Self {
        self.duplicate_ids.push(id.into());
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().expect("mutex poisoned").clone()
    }

    pub fn modes(&self) -> Vec<WriteMode> {
        self.modes.lock().expect("mutex poisoned").clone()
    }
}

#[async_trait]
impl WriteSink for TestSink {
    async fn write(&self, record: Record, mode: WriteMode) -> Result<(), WriteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.modes.lock().expect("mutex poisoned").push(mode);

        let id = record.get("id").unwrap_or_default().to_owned();
        if self.fail_ids.contains(&id) {
            return Err(WriteError::new(format!("storage offline while writing {id}")));
        }
        if self.duplicate_ids.contains(&id) {
            return Err(WriteError::unique_violation("id"));
        }
        self.records.lock().expect("mutex poisoned").push(record);
        Ok(())
    }
}

#[async_trait]
impl SchemaResolver for TestSink {
    async fn resolve(&self, collection: &str) -> Result<Schema, SchemaNotFound> {
        if collection == "missing" {
            return Err(SchemaNotFound(collection.to_owned()));
        }
        Ok(Schema::new(collection))
    }
}

impl EntityFactory for TestSink {}

/// `id,name` header followed by `n` rows `i,row-i`, ids starting at 1.
pub fn csv_rows(n: usize) -> String {
    let mut out = String::from("id,name\n");
    for i in 1..=n {
        out.push_str(&format!("{i},row-{i}\n"));
    }
    out
}

pub fn reader(text: impl Into<String>) -> std::io::Cursor<Vec<u8>> {
    std::io::Cursor::new(text.into().into_bytes())
}

/// Quiet config with a short progress interval.
pub fn config() -> ImportConfig {
    ImportConfig::new()
        .quiet()
        .progress_interval(Duration::from_millis(10))
}

/// In-memory progress output.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn output(&self) -> ProgressOutput {
        ProgressOutput::writer(self.clone())
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("mutex poisoned")).into_owned()
    }

    /// Counts from every `Processed: N rows` line, in order.
    pub fn processed_counts(&self) -> Vec<u64> {
        self.contents()
            .split(['\r', '\n'])
            .filter_map(|line| line.strip_prefix("Processed: "))
            .filter_map(|rest| rest.split(' ').next())
            .filter_map(|n| n.parse().ok())
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("mutex poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Reader that remembers whether anyone polled it.
pub struct TouchedReader {
    inner: std::io::Cursor<Vec<u8>>,
    touched: Arc<AtomicBool>,
}

impl TouchedReader {
    pub fn new(text: impl Into<String>) -> (Self, Arc<AtomicBool>) {
        let touched = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner: reader(text),
                touched: touched.clone(),
            },
            touched,
        )
    }
}

impl AsyncRead for TouchedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.touched.store(true, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
