//! Commit log pipeline integration tests
//!
//! Segments are plain files in a temp `cdc_raw` directory; their mutations
//! come from a scripted reader, so the tests exercise everything from the
//! directory scan to the producer and the archive folder.
//!
//! Run with: cargo test -p rivven-cdc-cassandra --test commit_log_pipeline

mod harness;

use harness::*;
use pretty_assertions::assert_eq;
use rivven_cdc_cassandra::cassandra::{
    CellValue, ChangeEventQueues, Column, CommitLogProcessor, CommitLogReadHandler,
    ErroneousSegments, Event, FieldFilter, MemoryOffsetStore, Operation, OffsetFlushPolicy,
    OffsetTracker, Record, RecordMaker, TypeRegistry,
};
use rivven_cdc_cassandra::{CdcSource, CommitLogMetrics};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Reader → queue ordering
// ============================================================================

#[tokio::test]
async fn test_insert_delete_eof_order_on_queue() {
    init_test_logging();
    let env = TestEnv::new().await;
    env.write_segment(SEGMENT_1).await;
    env.reader.script(
        SEGMENT_1,
        vec![(insert(1, 10, 7, "widget"), false), (delete(1, 20, 7), true)],
    );

    let metrics = Arc::new(CommitLogMetrics::new("pipeline-test"));
    let queues = ChangeEventQueues::new(1, 16, 16);
    let offsets = Arc::new(OffsetTracker::new(
        Arc::new(MemoryOffsetStore::new()),
        OffsetFlushPolicy::default(),
    ));
    let handler = Arc::new(CommitLogReadHandler::new(
        env.catalog.clone(),
        RecordMaker::new(
            "cluster1",
            Arc::new(TypeRegistry::new()),
            FieldFilter::allow_all(),
            true,
            metrics.clone(),
        ),
        queues.clone(),
        offsets,
        ErroneousSegments::new(),
        metrics.clone(),
    ));
    let processor = CommitLogProcessor::new(
        env.cdc_dir(),
        env.reader.clone(),
        handler,
        Duration::from_millis(10),
        metrics.clone(),
    );

    assert_eq!(processor.process_available().await.unwrap(), 1);

    let events = queues.get(0).unwrap().drain();
    assert_eq!(events.len(), 3);

    let Event::Record(Record::Change(change)) = &events[0] else {
        panic!("expected change record, got {:?}", events[0]);
    };
    assert_eq!(change.op, Operation::Insert);
    assert_eq!(change.key, vec![Column::new("id", CellValue::Int(7))]);
    assert_eq!(
        change.columns,
        vec![Column::new("name", CellValue::Text("widget".into()))]
    );

    let Event::Record(Record::Tombstone(tombstone)) = &events[1] else {
        panic!("expected tombstone record, got {:?}", events[1]);
    };
    assert_eq!(tombstone.key, vec![Column::new("id", CellValue::Int(7))]);
    assert_eq!(tombstone.source.commit_log_file, SEGMENT_1);

    let Event::Eof(eof) = &events[2] else {
        panic!("expected eof, got {:?}", events[2]);
    };
    assert_eq!(eof.file_name(), SEGMENT_1);
    assert!(eof.complete());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.segments_read, 1);
    assert_eq!(snapshot.mutations_processed, 2);
}

// ============================================================================
// Full pipeline
// ============================================================================

#[tokio::test]
async fn test_pipeline_emits_and_archives() {
    init_test_logging();
    let env = TestEnv::new().await;
    env.write_segment(SEGMENT_1).await;
    env.reader.script(
        SEGMENT_1,
        vec![(insert(1, 10, 7, "widget"), false), (delete(1, 20, 7), true)],
    );

    let mut cdc = env.source(env.config(2));
    cdc.start().await.unwrap();
    wait_for(|| env.archived(SEGMENT_1)).await;
    cdc.stop().await.unwrap();

    let records = env.producer.records_for("test.shop.orders");
    assert_eq!(records.len(), 3);
    for record in &records {
        assert_eq!(record.key_json().unwrap(), json!({ "id": 7 }));
    }

    let created = records[0].value_json().unwrap().unwrap();
    assert_eq!(created["op"], "c");
    assert_eq!(created["after"], json!({ "id": 7, "name": "widget" }));
    assert_eq!(created["source"]["file"], SEGMENT_1);
    assert_eq!(created["source"]["keyspace"], "shop");
    assert_eq!(created["source"]["table"], "orders");

    let deleted = records[1].value_json().unwrap().unwrap();
    assert_eq!(deleted["op"], "d");
    assert_eq!(deleted["after"], json!({ "id": 7 }));
    assert_eq!(records[2].value, None);

    assert!(!env.cdc_dir().join(SEGMENT_1).exists());
    assert!(!env.retired("error", SEGMENT_1));

    let offsets = env.saved_offsets().await;
    assert_eq!(
        offsets,
        json!({ "shop.orders": { "segment_id": 1, "position": 20 } })
    );
}

#[tokio::test]
async fn test_unreadable_segment_moves_to_error() {
    init_test_logging();
    let env = TestEnv::new().await;
    env.write_segment(SEGMENT_1).await;
    env.reader
        .script_failure(SEGMENT_1, vec![(insert(1, 10, 7, "widget"), false)], "bad crc");

    let mut cdc = env.source(env.config(1));
    cdc.start().await.unwrap();
    wait_for(|| env.retired("error", SEGMENT_1)).await;
    cdc.stop().await.unwrap();

    assert!(!env.archived(SEGMENT_1));
    assert_eq!(cdc.metrics().snapshot().segments_errored, 1);
    // Records read before the failure still reach the broker
    assert_eq!(env.producer.records_for("test.shop.orders").len(), 1);
}

#[tokio::test]
async fn test_restart_resumes_from_saved_offset() {
    init_test_logging();
    let env = TestEnv::new().await;
    env.write_segment(SEGMENT_1).await;
    env.reader.script(
        SEGMENT_1,
        vec![(insert(1, 10, 7, "widget"), false), (insert(1, 30, 8, "gadget"), false)],
    );

    let mut first = env.source(env.config(1));
    first.start().await.unwrap();
    wait_for(|| env.archived(SEGMENT_1)).await;
    first.stop().await.unwrap();
    assert_eq!(env.producer.len(), 2);

    // The same segment shows up again next to a new one
    std::fs::remove_file(env.retired_path("archive", SEGMENT_1)).unwrap();
    env.write_segment(SEGMENT_1).await;
    env.write_segment(SEGMENT_2).await;
    env.reader
        .script(SEGMENT_2, vec![(insert(2, 5, 9, "gizmo"), false)]);

    let mut second = env.source(env.config(1));
    second.start().await.unwrap();
    wait_for(|| env.archived(SEGMENT_1) && env.archived(SEGMENT_2)).await;
    second.stop().await.unwrap();

    let keys: Vec<_> = env
        .producer
        .records_for("test.shop.orders")
        .iter()
        .map(|r| r.key_json().unwrap())
        .collect();
    // 1:10 precedes the saved offset 1:30; the row at 1:30 itself is read again
    assert_eq!(
        keys,
        vec![
            json!({ "id": 7 }),
            json!({ "id": 8 }),
            json!({ "id": 8 }),
            json!({ "id": 9 })
        ]
    );
    assert_eq!(
        env.saved_offsets().await,
        json!({ "shop.orders": { "segment_id": 2, "position": 5 } })
    );
}

#[tokio::test]
async fn test_rows_of_one_mutation_share_a_position() {
    init_test_logging();
    let env = TestEnv::new().await;
    env.write_segment(SEGMENT_1).await;
    env.reader.script(
        SEGMENT_1,
        vec![
            (insert(1, 10, 1, "first"), false),
            (insert(1, 10, 2, "second"), false),
            (insert(1, 10, 3, "third"), false),
        ],
    );

    let mut cdc = env.source(env.config(1));
    cdc.start().await.unwrap();
    wait_for(|| env.archived(SEGMENT_1)).await;
    cdc.stop().await.unwrap();

    let keys: Vec<_> = env
        .producer
        .records_for("test.shop.orders")
        .iter()
        .map(|r| r.key_json().unwrap())
        .collect();
    assert_eq!(keys, vec![json!({ "id": 1 }), json!({ "id": 2 }), json!({ "id": 3 })]);
    assert_eq!(cdc.metrics().snapshot().mutations_skipped, 0);
    assert_eq!(
        env.saved_offsets().await,
        json!({ "shop.orders": { "segment_id": 1, "position": 10 } })
    );
}

#[tokio::test]
async fn test_excluded_fields_never_emitted() {
    init_test_logging();
    let env = TestEnv::new().await;
    env.write_segment(SEGMENT_1).await;
    env.reader.script(
        SEGMENT_1,
        vec![(
            insert(1, 10, 7, "widget").cell("secret", "hunter2"),
            false,
        )],
    );

    let mut config = env.config(1);
    config.field_exclude_list = vec!["shop.orders.secret".to_string(), "shop.orders.id".to_string()];
    let mut cdc = env.source(config);
    cdc.start().await.unwrap();
    wait_for(|| env.archived(SEGMENT_1)).await;
    cdc.stop().await.unwrap();

    let records = env.producer.records_for("test.shop.orders");
    assert_eq!(records.len(), 1);
    let value = records[0].value_json().unwrap().unwrap();
    assert_eq!(value["after"], json!({ "id": 7, "name": "widget" }));
}

#[tokio::test]
async fn test_unknown_table_is_skipped() {
    init_test_logging();
    let env = TestEnv::new().await;
    env.write_segment(SEGMENT_1).await;
    let mut unknown = insert(1, 10, 7, "widget");
    unknown.table = rivven_cdc_cassandra::cassandra::KeyspaceTable::new("shop", "unknown");
    env.reader
        .script(SEGMENT_1, vec![(unknown, false), (insert(1, 20, 8, "gadget"), false)]);

    let mut cdc = env.source(env.config(1));
    cdc.start().await.unwrap();
    wait_for(|| env.archived(SEGMENT_1)).await;
    cdc.stop().await.unwrap();

    assert_eq!(env.producer.len(), 1);
    assert_eq!(cdc.metrics().snapshot().mutations_skipped, 1);
}
