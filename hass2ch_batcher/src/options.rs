use std::{sync::Arc, time::Duration};

/// Derives the partition key of an item.
pub type PartitionFn<T, E> = Arc<dyn Fn(&T) -> Result<String, E> + Send + Sync>;

pub struct BatchOptions<T, E> {
    /// Number of items after which a partition is flushed.
    pub max_size: usize,
    /// Maximum time between the first item of a partition and its flush.
    pub max_wait: Duration,
    pub partition_by: PartitionFn<T, E>,
}

impl<T, E> Default for BatchOptions<T, E> {
    fn default() -> Self {
        Self {
            max_size: 100,
            max_wait: Duration::from_secs(60),
            partition_by: Arc::new(|_: &T| Ok(String::new())),
        }
    }
}

impl<T, E> Clone for BatchOptions<T, E> {
    fn clone(&self) -> Self {
        Self {
            max_size: self.max_size,
            max_wait: self.max_wait,
            partition_by: self.partition_by.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for BatchOptions<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("max_size", &self.max_size)
            .field("max_wait", &self.max_wait)
            .finish_non_exhaustive()
    }
}

impl<T, E> BatchOptions<T, E> {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_partition_by<F>(mut self, partition_by: F) -> Self
    where
        F: Fn(&T) -> Result<String, E> + Send + Sync + 'static,
    {
        self.partition_by = Arc::new(partition_by);
        self
    }
}
