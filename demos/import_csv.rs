//! Imports a CSV file, or a generated one, with live progress.
//!
//! Run with:
//! ```bash
//! cargo run --example import_csv                    # generated data, in-memory store
//! cargo run --example import_csv -- people.csv ";"  # dry run: print records as JSON
//! ```
//!
//! Ctrl-C stops the import; rows already being written are finished first.

use std::sync::Arc;
use std::time::Duration;

use bulkload::error::Result;
use bulkload::import::Importer;
use bulkload::pipeline::config::ImportConfig;
use bulkload::store::debug::DebugSink;
use bulkload::store::memory::MemoryStore;
use bulkload::store::{FieldSpec, Schema};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bulkload=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    match args.next() {
        Some(path) => {
            let delimiter = args.next().unwrap_or_else(|| ",".to_owned());
            dry_run(&path, &delimiter).await
        }
        None => generated().await,
    }
}

async fn dry_run(path: &str, delimiter: &str) -> Result<()> {
    let config = ImportConfig::new().delimiter(delimiter)?.quiet();
    let importer = Importer::new(Arc::new(DebugSink), config);
    stop_on_ctrl_c(&importer);

    let summary = importer.run_file(path, None).await?;
    eprintln!("{} rows mapped", summary.processed);
    Ok(())
}

async fn generated() -> Result<()> {
    let store = Arc::new(MemoryStore::new().with_collection(
        Schema::new("people")
            .field(FieldSpec::text("id").unique())
            .field(FieldSpec::text("email").unique())
            .field(FieldSpec::text("name").required()),
    ));

    let config = ImportConfig::new()
        .max_concurrency(64)
        .progress_interval(Duration::from_millis(200));
    let importer = Importer::new(store.clone(), config);
    stop_on_ctrl_c(&importer);

    let mut csv = String::from("id,email,name,ignored\n");
    for i in 0..200_000 {
        csv.push_str(&format!("{i},user{i}@example.com,User {i},x\n"));
    }

    importer.run(std::io::Cursor::new(csv.clone().into_bytes()), "people").await?;

    // Second pass hits only uniqueness conflicts and still succeeds.
    println!("re-running the same file:");
    importer.run(std::io::Cursor::new(csv.into_bytes()), "people").await?;
    println!("stored: {}", store.len("people"));
    Ok(())
}

fn stop_on_ctrl_c(importer: &Importer) {
    let stop = importer.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });
}
