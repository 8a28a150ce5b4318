#![cfg(feature = "journal")]

//! Journal persistence: append/read/drain round trips and the paths by
//! which the queue hands abandoned batches over.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use session_sync::journal::{AbandonedBatch, Journal};
use session_sync::queue::UpdateQueue;
use session_sync::{sink_fn, SyncError};
use tempfile::tempdir;

fn offline_sink() -> impl session_sync::UpdateSink<Key = String, Value = Value> {
    sink_fn(|_batch: HashMap<String, Value>| async {
        Err::<(), _>(std::io::Error::new(
            std::io::ErrorKind::Other,
            "database offline",
        ))
    })
}

#[tokio::test]
async fn append_read_and_drain_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("abandoned.jsonl");
    let journal = Journal::open(&path).await?;
    assert_eq!(journal.path(), path);

    journal.append(2, vec![("a".to_owned(), json!(1))]).await?;
    journal
        .append(0, vec![("b".to_owned(), json!(2)), ("c".to_owned(), json!(3))])
        .await?;

    let batches: Vec<AbandonedBatch<String, Value>> = journal.entries().await?;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].attempts, 2);
    assert_eq!(batches[0].updates, vec![("a".to_owned(), json!(1))]);
    assert_eq!(batches[1].attempts, 0);
    assert_eq!(batches[1].updates.len(), 2);
    assert!(batches[0].abandoned_at > 0);

    // Reading does not consume; draining does.
    let drained: Vec<AbandonedBatch<String, Value>> = journal.drain().await?;
    assert_eq!(drained.len(), 2);
    let after: Vec<AbandonedBatch<String, Value>> = journal.entries().await?;
    assert!(after.is_empty());
    assert_eq!(tokio::fs::metadata(&path).await?.len(), 0);
    Ok(())
}

#[tokio::test]
async fn corrupt_lines_are_skipped() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("abandoned.jsonl");
    let line = r#"{"abandoned_at":1,"attempts":3,"updates":[["a",1]]}"#;
    tokio::fs::write(&path, format!("{line}\nnot json at all\n{line}\n")).await?;

    let journal = Journal::open(&path).await?;
    let batches: Vec<AbandonedBatch<String, i64>> = journal.entries().await?;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].updates, vec![("a".to_owned(), 1)]);
    Ok(())
}

#[tokio::test]
async fn queue_journals_a_batch_abandoned_after_retries() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("abandoned.jsonl");
    let journal = Journal::open(&path).await?;

    let queue = UpdateQueue::builder(offline_sink())
        .delay(Duration::from_secs(60))
        .journal(journal)
        .build();
    queue.enqueue([
        ("status/note".to_owned(), json!("out")),
        ("status/blackout".to_owned(), json!(true)),
    ]);

    // Three forced flushes reach the retry bound.
    for _ in 0..3 {
        queue
            .flush_now()
            .await
            .expect_err("sink rejects every flush");
    }
    assert_eq!(queue.pending_len(), 0);

    let reader = Journal::open(&path).await?;
    let batches: Vec<AbandonedBatch<String, Value>> = reader.entries().await?;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].attempts, 3);
    let mut updates = batches[0].updates.clone();
    updates.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        updates,
        vec![
            ("status/blackout".to_owned(), json!(true)),
            ("status/note".to_owned(), json!("out")),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn rejected_shutdown_flush_lands_in_the_journal() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("abandoned.jsonl");
    let journal = Journal::open(&path).await?;

    let queue = UpdateQueue::builder(offline_sink())
        .delay(Duration::from_secs(60))
        .journal(journal)
        .build();
    queue.enqueue_one("a".to_owned(), json!(1));

    let error = queue.shutdown().await.expect_err("final flush rejected");
    assert!(matches!(error, SyncError::FlushFailed(_)));

    let reader = Journal::open(&path).await?;
    let batches: Vec<AbandonedBatch<String, Value>> = reader.entries().await?;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].attempts, 1);
    assert_eq!(batches[0].updates, vec![("a".to_owned(), json!(1))]);
    Ok(())
}
