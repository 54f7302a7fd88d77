//! Background application of eventually consistent index changes.
//!
//! Changes are queued in commit order and applied by one worker thread once
//! the configured staleness delay has passed. Jobs are applied while the
//! queue lock is held, so [`Propagator::flush`] and the worker never reorder
//! changes to the same entry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::Error;

use super::{IndexChange, SecondaryIndex};

struct Job {
    due: Instant,
    index: Arc<SecondaryIndex>,
    change: IndexChange,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    stopped: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

pub struct Propagator {
    shared: Arc<Shared>,
    delay: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Propagator {
    pub fn start(delay: Duration) -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wake: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("ferrolite-index".into())
            .spawn(move || run(&worker_shared))
            .map_err(|e| Error::Internal(format!("failed to start index worker: {e}")))?;
        Ok(Self {
            shared,
            delay,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue `change` for `index`. Applied inline once the worker has stopped.
    pub fn enqueue(&self, index: Arc<SecondaryIndex>, change: IndexChange) {
        if change.is_noop() {
            return;
        }
        let mut queue = self.shared.queue.lock();
        if queue.stopped {
            index.apply(change);
            return;
        }
        queue.jobs.push_back(Job {
            due: Instant::now() + self.delay,
            index,
            change,
        });
        drop(queue);
        self.shared.wake.notify_one();
    }

    /// Apply every queued change now.
    pub fn flush(&self) {
        let mut queue = self.shared.queue.lock();
        while let Some(job) = queue.jobs.pop_front() {
            job.index.apply(job.change);
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    /// Drain the queue and stop the worker. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.stopped = true;
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        self.flush();
    }
}

impl Drop for Propagator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared) {
    let mut queue = shared.queue.lock();
    loop {
        let Some(due) = queue.jobs.front().map(|job| job.due) else {
            if queue.stopped {
                break;
            }
            shared.wake.wait(&mut queue);
            continue;
        };
        if due > Instant::now() && !queue.stopped {
            shared.wake.wait_until(&mut queue, due);
            continue;
        }
        if let Some(job) = queue.jobs.pop_front() {
            job.index.apply(job.change);
        }
    }
    debug!("index propagation worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        IndexConsistency, IndexDefinition, IndexKind, KeyDefinition, KeySchema, KeyType,
        Projection,
    };
    use crate::value::{AttributeValue, Item};

    fn index() -> Arc<SecondaryIndex> {
        Arc::new(SecondaryIndex::new(
            IndexDefinition {
                index_name: "by_v".into(),
                kind: IndexKind::Global,
                partition_key: KeyDefinition::new("v", KeyType::String),
                sort_key: None,
                projection: Projection::default(),
                consistency: IndexConsistency::Eventual,
                provisioned_throughput: None,
            },
            KeySchema {
                partition_key: KeyDefinition::new("id", KeyType::String),
                sort_key: None,
            },
        ))
    }

    fn insert(key: &[u8]) -> IndexChange {
        IndexChange {
            remove: None,
            insert: Some((key.to_vec(), Item::from([("v".to_string(), AttributeValue::s("x"))]))),
        }
    }

    #[test]
    fn test_change_applied_after_delay() {
        let propagator = Propagator::start(Duration::from_millis(50)).unwrap();
        let idx = index();
        propagator.enqueue(Arc::clone(&idx), insert(b"k1"));
        assert!(idx.is_empty());

        let deadline = Instant::now() + Duration::from_secs(2);
        while idx.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(idx.len(), 1);
        assert_eq!(propagator.pending(), 0);
    }

    #[test]
    fn test_flush_applies_in_order() {
        let propagator = Propagator::start(Duration::from_secs(60)).unwrap();
        let idx = index();
        propagator.enqueue(Arc::clone(&idx), insert(b"k1"));
        propagator.enqueue(
            Arc::clone(&idx),
            IndexChange {
                remove: Some(b"k1".to_vec()),
                insert: None,
            },
        );
        propagator.enqueue(Arc::clone(&idx), insert(b"k2"));
        assert_eq!(propagator.pending(), 3);
        propagator.flush();
        let keys: Vec<Vec<u8>> = idx.entries().keys().cloned().collect();
        assert_eq!(keys, vec![b"k2".to_vec()]);
    }

    #[test]
    fn test_shutdown_drains_and_applies_inline_afterwards() {
        let propagator = Propagator::start(Duration::from_secs(60)).unwrap();
        let idx = index();
        propagator.enqueue(Arc::clone(&idx), insert(b"k1"));
        propagator.shutdown();
        assert_eq!(idx.len(), 1);

        propagator.enqueue(Arc::clone(&idx), insert(b"k2"));
        assert_eq!(idx.len(), 2);
        propagator.shutdown();
    }
}
