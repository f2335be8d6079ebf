use std::{collections::HashMap, time::Duration};

use hass2ch_batcher::{Batch, BatchOptions, batch};
use tokio::{sync::mpsc, time::Instant};

#[derive(Debug, Clone, PartialEq)]
struct Reading {
    entity: &'static str,
    seq: usize,
}

fn by_domain() -> BatchOptions<Reading, String> {
    BatchOptions::default().with_partition_by(|reading: &Reading| {
        reading
            .entity
            .split_once('.')
            .map(|(domain, _)| domain.to_string())
            .ok_or_else(|| format!("missing domain in {}", reading.entity))
    })
}

/// Timer deadlines are rounded to the millisecond.
fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(2),
        "expected {expected:?}, elapsed {elapsed:?}"
    );
}

async fn collect<T>(mut rx: mpsc::Receiver<Batch<T>>) -> Vec<Batch<T>> {
    let mut batches = Vec::new();
    while let Some(batch) = rx.recv().await {
        batches.push(batch);
    }
    batches
}

#[tokio::test]
async fn test_constant_key_splits_into_full_batches() {
    let (tx, rx) = mpsc::channel(16);
    let options = BatchOptions::<usize, ()>::default()
        .with_max_size(3)
        .with_max_wait(Duration::from_secs(3600));
    let (batches, _errors) = batch(rx, options);

    let producer = tokio::spawn(async move {
        for i in 0..10 {
            tx.send(i).await.expect("send");
        }
    });

    let batches = collect(batches).await;
    producer.await.expect("producer");

    let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);

    let items: Vec<_> = batches.into_iter().flat_map(|b| b.items).collect();
    assert_eq!(items, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_distinct_keys_never_mix() {
    let (tx, rx) = mpsc::channel(64);
    let (batches, _errors) = batch(rx, by_domain().with_max_size(4));

    let entities = ["switch.a", "light.b", "sensor.c"];
    let producer = tokio::spawn(async move {
        for seq in 0..30 {
            let entity = entities[seq % entities.len()];
            tx.send(Reading { entity, seq }).await.expect("send");
        }
    });

    let batches = collect(batches).await;
    producer.await.expect("producer");

    let mut per_key: HashMap<String, Vec<usize>> = HashMap::new();
    for batch in &batches {
        assert!(batch.len() <= 4);
        assert!(
            batch
                .items
                .iter()
                .all(|r| r.entity.starts_with(&format!("{}.", batch.key)))
        );
        per_key
            .entry(batch.key.clone())
            .or_default()
            .extend(batch.items.iter().map(|r| r.seq));
    }

    assert_eq!(per_key.len(), 3);
    for seqs in per_key.values() {
        assert_eq!(seqs.len(), 10);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "order not preserved");
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_flushes_once() {
    let max_wait = Duration::from_secs(1);
    let (tx, rx) = mpsc::channel(16);
    let (mut batches, _errors) = batch(rx, by_domain().with_max_size(100).with_max_wait(max_wait));

    let start = Instant::now();
    for seq in 0..3 {
        tx.send(Reading {
            entity: "sensor.temp",
            seq,
        })
        .await
        .expect("send");
    }

    let early = tokio::time::timeout(max_wait - Duration::from_millis(1), batches.recv()).await;
    assert!(early.is_err(), "flushed before the deadline");

    let batch = batches.recv().await.expect("batch");
    assert_eq!(batch.key, "sensor");
    assert_eq!(batch.len(), 3);
    assert_elapsed(start, max_wait);

    // Nothing else is pending for the partition.
    let next = tokio::time::timeout(max_wait * 5, batches.recv()).await;
    assert!(next.is_err(), "unexpected second flush");

    drop(tx);
    assert!(batches.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_partitions_have_independent_deadlines() {
    let max_wait = Duration::from_millis(100);
    let (tx, rx) = mpsc::channel(16);
    let (mut batches, _errors) = batch(rx, by_domain().with_max_wait(max_wait));

    let start = Instant::now();
    tx.send(Reading { entity: "switch.a", seq: 0 }).await.expect("send");
    tokio::time::sleep(Duration::from_millis(60)).await;
    tx.send(Reading { entity: "light.b", seq: 1 }).await.expect("send");

    let first = batches.recv().await.expect("first batch");
    assert_eq!(first.key, "switch");
    assert_elapsed(start, Duration::from_millis(100));

    let second = batches.recv().await.expect("second batch");
    assert_eq!(second.key, "light");
    assert_elapsed(start, Duration::from_millis(160));
}

#[tokio::test]
async fn test_input_close_flushes_every_partition() {
    let (tx, rx) = mpsc::channel(64);
    let (batches, errors) = batch(rx, by_domain().with_max_size(100));

    let entities = ["switch.a", "light.b", "invalid", "sensor.c", "invalid"];
    for (seq, entity) in entities.into_iter().enumerate() {
        tx.send(Reading { entity, seq }).await.expect("send");
    }
    drop(tx);

    let batches = collect(batches).await;
    let keys: Vec<_> = batches.iter().map(|b| b.key.as_str()).collect();
    assert_eq!(keys, vec!["light", "sensor", "switch"]);

    let total: usize = batches.iter().map(Batch::len).sum();
    assert_eq!(total, entities.len() - 2);

    let errors: Vec<_> = collect_errors(errors).await;
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("invalid"));
}

#[tokio::test]
async fn test_dropped_receiver_stops_engine() {
    let (tx, rx) = mpsc::channel(4);
    let (batches, _errors) = batch(rx, BatchOptions::<usize, ()>::default().with_max_size(1));
    drop(batches);

    // The engine exits and drops the input receiver.
    tokio::time::timeout(Duration::from_secs(5), tx.closed())
        .await
        .expect("engine did not stop");
}

async fn collect_errors<E>(mut rx: mpsc::UnboundedReceiver<E>) -> Vec<E> {
    let mut errors = Vec::new();
    while let Some(err) = rx.recv().await {
        errors.push(err);
    }
    errors
}
