//! Per-key serialization of async work.
//!
//! Jobs for the same key run one after another in submission order; jobs
//! for different keys run concurrently. A key's queue and worker exist only
//! while it has work.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::trace;

type Job = BoxFuture<'static, ()>;

pub struct KeyedSerializer<K> {
    queues: Arc<DashMap<K, mpsc::UnboundedSender<Job>>>,
}

impl<K> Clone for KeyedSerializer<K> {
    fn clone(&self) -> Self {
        Self {
            queues: self.queues.clone(),
        }
    }
}

impl<K> KeyedSerializer<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
        }
    }

    /// Queue `job` behind any earlier work for `key`.
    pub fn dispatch(&self, key: K, job: impl std::future::Future<Output = ()> + Send + 'static) {
        let job: Job = Box::pin(job);
        // entry() holds the shard lock, so a worker cannot retire this key meanwhile
        match self.queues.entry(key.clone()) {
            Entry::Occupied(queue) => {
                let sent = queue.get().send(job);
                if let Err(rejected) = sent {
                    // worker gone without retiring; start over with a fresh queue
                    let (tx, rx) = mpsc::unbounded_channel();
                    let _ = tx.send(rejected.0);
                    queue.replace_entry(tx);
                    self.spawn_worker(key, rx);
                }
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(job);
                slot.insert(tx);
                self.spawn_worker(key, rx);
            }
        }
    }

    /// Keys with queued or running work.
    pub fn active_keys(&self) -> usize {
        self.queues.len()
    }

    fn spawn_worker(&self, key: K, mut rx: mpsc::UnboundedReceiver<Job>) {
        let queues = self.queues.clone();
        tokio::spawn(async move {
            loop {
                while let Ok(job) = rx.try_recv() {
                    job.await;
                }
                // retire only if nothing slipped in before the shard lock was taken
                let mut late = None;
                let retired = queues.remove_if(&key, |_, _| match rx.try_recv() {
                    Ok(job) => {
                        late = Some(job);
                        false
                    }
                    Err(_) => true,
                });
                if retired.is_some() {
                    trace!(?key, "keyed queue retired");
                    break;
                }
                if let Some(job) = late {
                    job.await;
                }
            }
        });
    }
}

impl<K> Default for KeyedSerializer<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn same_key_runs_in_arrival_order() {
        let serializer = KeyedSerializer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // the first job is the slowest; a concurrent scheme would finish it last
        for (n, delay) in [(1, 30), (2, 10), (3, 0)] {
            let log = log.clone();
            serializer.dispatch(7, async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                log.lock().unwrap().push(n);
            });
        }

        let (done_tx, done_rx) = oneshot::channel();
        serializer.dispatch(7, async move {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn different_keys_do_not_wait_on_each_other() {
        let serializer = KeyedSerializer::new();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();

        // key 1 blocks until released; key 2 must still make progress
        serializer.dispatch(1, async move {
            let _ = gate_rx.await;
        });
        serializer.dispatch(2, async move {
            let _ = done_tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
        let _ = gate_tx.send(());
    }

    #[tokio::test]
    async fn idle_queues_are_removed() {
        let serializer = KeyedSerializer::new();
        let (done_tx, done_rx) = oneshot::channel();
        serializer.dispatch("a".to_string(), async move {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();

        for _ in 0..100 {
            if serializer.active_keys() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue for idle key was not retired");
    }
}
