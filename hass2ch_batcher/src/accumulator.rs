use std::collections::HashMap;

use tokio_util::time::{DelayQueue, delay_queue};

/// Items of one partition, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    pub key: String,
    pub items: Vec<T>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Open partitions and their flush deadlines.
pub(crate) struct Accumulator<T> {
    max_size: usize,
    max_wait: std::time::Duration,
    partitions: HashMap<String, PartitionState<T>>,
    deadlines: DelayQueue<String>,
}

struct PartitionState<T> {
    items: Vec<T>,
    timer_key: delay_queue::Key,
}

impl<T> Accumulator<T> {
    pub fn new(max_size: usize, max_wait: std::time::Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            max_wait,
            partitions: HashMap::new(),
            deadlines: DelayQueue::new(),
        }
    }

    /// Appends `item` to its partition. Returns the partition's batch if it is full.
    pub fn push(&mut self, key: String, item: T) -> Option<Batch<T>> {
        let deadlines = &mut self.deadlines;
        let max_wait = self.max_wait;
        let state = self
            .partitions
            .entry(key.clone())
            .or_insert_with(|| PartitionState {
                items: Vec::new(),
                timer_key: deadlines.insert(key.clone(), max_wait),
            });

        state.items.push(item);

        if state.items.len() < self.max_size {
            return None;
        }

        let state = self.partitions.remove(&key)?;
        self.deadlines.try_remove(&state.timer_key);

        Some(Batch {
            key,
            items: state.items,
        })
    }

    /// Waits for the next partition deadline and returns its batch.
    ///
    /// Returns `None` when no partition is open.
    pub async fn next_expired(&mut self) -> Option<Batch<T>> {
        let expired = std::future::poll_fn(|cx| self.deadlines.poll_expired(cx)).await?;
        let key = expired.into_inner();
        let state = self.partitions.remove(&key)?;

        Some(Batch {
            key,
            items: state.items,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Removes every open partition.
    pub fn drain(&mut self) -> Vec<Batch<T>> {
        self.deadlines.clear();
        self.partitions
            .drain()
            .map(|(key, state)| Batch {
                key,
                items: state.items,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_push_flushes_at_max_size() {
        let mut acc = Accumulator::new(2, Duration::from_secs(60));

        assert!(acc.push("a".to_string(), 1).is_none());
        assert!(acc.push("b".to_string(), 2).is_none());

        let batch = acc.push("a".to_string(), 3).expect("full batch");
        assert_eq!(batch.key, "a");
        assert_eq!(batch.items, vec![1, 3]);

        // A fresh window starts with the next item.
        assert!(acc.push("a".to_string(), 4).is_none());

        let mut rest = acc.drain();
        rest.sort_by(|l, r| l.key.cmp(&r.key));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].items, vec![4]);
        assert_eq!(rest[1].items, vec![2]);
        assert!(acc.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_only_fires_for_open_window() {
        let mut acc = Accumulator::new(1, Duration::from_millis(100));

        // Flushed by size, so its timer must not produce a batch.
        assert!(acc.push("a".to_string(), 1).is_some());
        assert!(acc.next_expired().await.is_none());
    }
}
