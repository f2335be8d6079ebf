use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    accumulator::{Accumulator, Batch},
    options::BatchOptions,
};

/// Batches `input` until it closes.
///
/// Returns the batch stream and the stream of partition errors. Batches are
/// handed over on a channel of capacity one, so a slow consumer holds back
/// the input. Errors are buffered without bound and never block batching.
///
/// When `input` closes, every open partition is flushed and both streams end.
/// Dropping the batch receiver stops the engine.
pub fn batch<T, E>(
    input: mpsc::Receiver<T>,
    options: BatchOptions<T, E>,
) -> (mpsc::Receiver<Batch<T>>, mpsc::UnboundedReceiver<E>)
where
    T: Send + 'static,
    E: Send + 'static,
{
    let (batch_tx, batch_rx) = mpsc::channel(1);
    let (error_tx, error_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_batcher(input, options, batch_tx, error_tx));

    (batch_rx, error_rx)
}

async fn run_batcher<T, E>(
    mut input: mpsc::Receiver<T>,
    options: BatchOptions<T, E>,
    batch_tx: mpsc::Sender<Batch<T>>,
    error_tx: mpsc::UnboundedSender<E>,
) {
    let mut accumulator = Accumulator::new(options.max_size, options.max_wait);

    loop {
        tokio::select! {
            _ = batch_tx.closed() => {
                debug!("batch receiver dropped, stopping batcher");
                return;
            }
            expired = accumulator.next_expired(), if !accumulator.is_empty() => {
                let Some(batch) = expired else {
                    continue;
                };

                trace!(key = %batch.key, size = batch.len(), "partition deadline reached");
                if !emit(&batch_tx, batch).await {
                    return;
                }
            }
            item = input.recv() => {
                let Some(item) = item else {
                    break;
                };

                let key = match (options.partition_by)(&item) {
                    Ok(key) => key,
                    Err(err) => {
                        // Nobody listening for errors is not a reason to stop.
                        let _ = error_tx.send(err);
                        continue;
                    }
                };

                if let Some(batch) = accumulator.push(key, item) {
                    trace!(key = %batch.key, size = batch.len(), "partition full");
                    if !emit(&batch_tx, batch).await {
                        return;
                    }
                }
            }
        }
    }

    let mut remaining = accumulator.drain();
    remaining.sort_by(|l, r| l.key.cmp(&r.key));

    debug!(partitions = remaining.len(), "input closed, flushing open partitions");

    for batch in remaining {
        if !emit(&batch_tx, batch).await {
            return;
        }
    }
}

/// Hands `batch` to the consumer. Returns false if the consumer is gone.
async fn emit<T>(batch_tx: &mpsc::Sender<Batch<T>>, batch: Batch<T>) -> bool {
    batch_tx.send(batch).await.is_ok()
}
