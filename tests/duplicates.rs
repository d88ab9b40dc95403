use std::sync::Arc;

use bulkload::error::Result;
use bulkload::import::Importer;
use bulkload::store::memory::MemoryStore;
use bulkload::store::{FieldSpec, Schema};

mod common;
use common::{config, csv_rows, reader, TestSink};

fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new().with_collection(
        Schema::new("people")
            .field(FieldSpec::text("id").unique())
            .field(FieldSpec::text("name").required()),
    ))
}

#[tokio::test]
async fn rerunning_an_import_skips_existing_rows() -> Result<()> {
    let store = store();
    let importer = Importer::new(store.clone(), config().max_concurrency(8));

    let first = importer.run(reader(csv_rows(120)), "people").await?;
    let second = importer.run(reader(csv_rows(120)), "people").await?;

    assert_eq!(first.processed, 120);
    assert_eq!(second.processed, 120);
    assert_eq!(store.len("people"), 120);
    Ok(())
}

#[tokio::test]
async fn overlapping_import_only_adds_new_rows() -> Result<()> {
    let store = store();
    let importer = Importer::new(store.clone(), config());

    importer.run(reader(csv_rows(50)), "people").await?;
    let summary = importer.run(reader(csv_rows(80)), "people").await?;

    assert_eq!(summary.processed, 80);
    assert_eq!(store.len("people"), 80);
    Ok(())
}

#[tokio::test]
async fn duplicate_rows_within_one_file_are_tolerated() -> Result<()> {
    let sink = Arc::new(TestSink::new().duplicate_on("2").duplicate_on("4"));
    let importer = Importer::new(sink.clone(), config());

    let summary = importer.run(reader(csv_rows(5)), "things").await?;

    assert_eq!(summary.processed, 5);
    assert_eq!(sink.records().len(), 3);
    Ok(())
}

#[tokio::test]
async fn validation_failures_are_fatal_not_skipped() {
    let store = store();
    let importer = Importer::new(store.clone(), config());

    let err = importer
        .run(reader("id,name\n1,ada\n2,\n3,grace\n"), "people")
        .await
        .unwrap_err();

    match err {
        bulkload::error::Error::Write { row, source } => {
            assert_eq!(row, 2);
            assert!(!source.is_unique_violation());
        }
        other => panic!("expected write error, got {other:?}"),
    }
}

#[tokio::test]
async fn skipping_validation_accepts_blank_required_fields() -> Result<()> {
    let store = store();
    let importer = Importer::new(store.clone(), config().validating(false));

    let summary = importer
        .run(reader("id,name\n1,ada\n2,\n3,grace\n"), "people")
        .await?;

    assert_eq!(summary.processed, 3);
    assert_eq!(store.len("people"), 3);
    Ok(())
}
