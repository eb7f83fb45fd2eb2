use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;
use tokio::sync::broadcast;

type WaitMap<K, V> = Arc<Mutex<HashMap<K, broadcast::Sender<V>>>>;

/// An LRU cache where at most one caller computes the value for a key.
///
/// Concurrent callers asking for a key being computed wait for the result
/// of the first one instead of computing it again.
#[derive(Clone)]
pub(crate) struct DedupCache<K: Clone + Send + Eq + Hash, V: Clone> {
    wait_map: WaitMap<K, V>,
    storage: Arc<Mutex<LruCache<K, V>>>,
}

impl<K, V> DedupCache<K, V>
where
    K: Clone + Send + Eq + Hash + 'static,
    V: Clone + Send + 'static,
{
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            wait_map: Arc::new(Mutex::new(HashMap::new())),
            storage: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub(crate) async fn get(&self, key: K) -> Entry<K, V> {
        // the wait map lock is held while checking storage so that a value
        // cannot be inserted between the two lookups
        let mut locked_wait_map = self.wait_map.lock().await;
        if let Some(value) = self.storage.lock().await.get(&key) {
            return Entry {
                inner: EntryInner::Value(value.clone()),
            };
        }
        match locked_wait_map.get(&key) {
            Some(waiter) => {
                // Register interest in key
                let receiver = waiter.subscribe();
                Entry {
                    inner: EntryInner::Receiver {
                        receiver,
                        cache: self.clone(),
                        key,
                    },
                }
            }
            None => {
                let (sender, _receiver) = broadcast::channel(1);
                locked_wait_map.insert(key.clone(), sender.clone());
                Entry {
                    inner: EntryInner::First(FirstEntry {
                        key,
                        sender,
                        cache: self.clone(),
                        done: false,
                    }),
                }
            }
        }
    }

    async fn insert(&self, key: K, value: V) {
        self.storage.lock().await.put(key, value);
    }

    async fn remove_wait(&self, key: &K) {
        let mut locked_wait_map = self.wait_map.lock().await;
        let _ = locked_wait_map.remove(key);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.storage.lock().await.len()
    }
}

pub(crate) struct Entry<K: Clone + Send + Eq + Hash + 'static, V: Clone + Send + 'static> {
    inner: EntryInner<K, V>,
}

enum EntryInner<K: Clone + Send + Eq + Hash + 'static, V: Clone + Send + 'static> {
    First(FirstEntry<K, V>),
    Receiver {
        receiver: broadcast::Receiver<V>,
        cache: DedupCache<K, V>,
        key: K,
    },
    Value(V),
}

/// The caller in charge of computing the value.
struct FirstEntry<K: Clone + Send + Eq + Hash + 'static, V: Clone + Send + 'static> {
    key: K,
    sender: broadcast::Sender<V>,
    cache: DedupCache<K, V>,
    done: bool,
}

impl<K, V> Drop for FirstEntry<K, V>
where
    K: Clone + Send + Eq + Hash + 'static,
    V: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if self.done {
            return;
        }
        // the computation was abandoned: release the key so that waiters
        // retry. Dropping the sender closes their receivers.
        let wait_map = self.cache.wait_map.clone();
        let key = self.key.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = wait_map.lock().await.remove(&key);
            });
        }
    }
}

impl<K, V> Entry<K, V>
where
    K: Clone + Send + Eq + Hash + 'static,
    V: Clone + Send + 'static,
{
    pub(crate) fn is_first(&self) -> bool {
        matches!(self.inner, EntryInner::First(_))
    }

    /// Wait for the value. Returns `None` for the first caller, or when the
    /// first caller went away without producing a value: the caller should
    /// then compute the value itself.
    pub(crate) async fn get(self) -> Option<V> {
        match self.inner {
            // there was already a value in cache
            EntryInner::Value(value) => Some(value),
            EntryInner::Receiver {
                mut receiver,
                cache,
                key,
            } => match receiver.recv().await {
                Ok(value) => Some(value),
                // the value may have landed in storage while subscribing
                Err(_) => cache.storage.lock().await.get(&key).cloned(),
            },
            EntryInner::First(_) => None,
        }
    }

    /// Store the value and hand it to every waiter.
    pub(crate) async fn insert(self, value: V) {
        if let EntryInner::First(mut first) = self.inner {
            first
                .cache
                .insert(first.key.clone(), value.clone())
                .await;
            first.cache.remove_wait(&first.key).await;
            first.done = true;
            let _ = first.sender.send(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;

    async fn compute(cache: &DedupCache<String, usize>, counter: &AtomicUsize) -> usize {
        loop {
            let entry = cache.get("key".to_string()).await;
            if entry.is_first() {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let value = counter.fetch_add(1, Ordering::SeqCst) + 42;
                entry.insert(value).await;
                return value;
            }
            if let Some(value) = entry.get().await {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn computes_once_per_key() {
        let cache = DedupCache::new(10);
        let counter = AtomicUsize::new(0);
        let values = join_all((0..20).map(|_| compute(&cache, &counter))).await;
        assert!(values.iter().all(|value| *value == 42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len().await, 1);

        let entry = cache.get("key".to_string()).await;
        assert!(!entry.is_first());
        assert_eq!(entry.get().await, Some(42));
    }

    #[tokio::test]
    async fn abandoned_computation_lets_waiters_retry() {
        let cache: DedupCache<String, usize> = DedupCache::new(10);
        let first = cache.get("key".to_string()).await;
        assert!(first.is_first());
        let waiter = cache.get("key".to_string()).await;
        assert!(!waiter.is_first());

        drop(first);
        assert_eq!(waiter.get().await, None);
        // the wait entry is removed by a spawned task
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get("key".to_string()).await.is_first());
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cache: DedupCache<usize, usize> = DedupCache::new(2);
        for key in 0..3 {
            let entry = cache.get(key).await;
            entry.insert(key * 10).await;
        }
        assert_eq!(cache.len().await, 2);
        assert!(cache.get(0).await.is_first());
        assert_eq!(cache.get(2).await.get().await, Some(20));
    }
}
