//! Single-flight execution per `(tool, key)`.
//!
//! A run executing a cacheable call holds that call's flight lock. A second
//! run for the same call waits on the lock, then re-reads the cache: an entry
//! whose generation differs from the one observed before waiting was just
//! written by the other run and is returned without executing again.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type FlightKey = (String, String);

/// Registry of per-call locks. Entries are dropped once no run holds or
/// waits on them.
#[derive(Debug, Default)]
pub struct FlightGroup {
    locks: Mutex<HashMap<FlightKey, Arc<Mutex<()>>>>,
}

/// Held while a call executes. Releasing it wakes the next waiter.
///
/// Dropping an unreleased guard (a cancelled or timed-out run) also unlocks
/// the call. Its registry entry is removed when the registry is not
/// contended at that moment; otherwise the next release of the same call
/// removes it.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    group: &'a FlightGroup,
    key: FlightKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other run is executing `(tool, key)`, then claim it.
    pub async fn acquire(&self, tool: &str, key: &str) -> FlightGuard<'_> {
        let flight_key = (tool.to_string(), key.to_string());
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(flight_key.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        FlightGuard {
            group: self,
            key: flight_key,
            guard: Some(guard),
        }
    }

    /// Number of calls currently held or awaited.
    pub async fn in_flight(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn release(&self, key: &FlightKey, guard: OwnedMutexGuard<()>) {
        let mut locks = self.locks.lock().await;
        drop(guard);
        // Only the map holds a reference once every waiter is gone.
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

impl FlightGuard<'_> {
    /// Release the lock and drop the registry entry when unused.
    pub async fn release(mut self) {
        if let Some(guard) = self.guard.take() {
            self.group.release(&self.key, guard).await;
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        drop(guard);
        if let Ok(mut locks) = self.group.locks.try_lock() {
            if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_removes_entry() {
        let group = FlightGroup::new();
        let guard = group.acquire("get_schema_information", "db:S:schema:d").await;
        assert_eq!(group.in_flight().await, 1);
        guard.release().await;
        assert_eq!(group.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_unlocks_and_removes_entry() {
        let group = FlightGroup::new();
        let guard = group.acquire("get_table_information", "db:S:schema:d:table:T").await;
        drop(guard);
        assert_eq!(group.in_flight().await, 0);

        let again = tokio::time::timeout(
            Duration::from_millis(100),
            group.acquire("get_table_information", "db:S:schema:d:table:T"),
        )
        .await
        .expect("lock was not released on drop");
        again.release().await;
    }

    #[tokio::test]
    async fn test_cancelled_holder_leaves_no_entry() {
        let group = Arc::new(FlightGroup::new());
        let holder = {
            let group = group.clone();
            tokio::spawn(async move {
                let _guard = group.acquire("t", "k").await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };
        while group.in_flight().await == 0 {
            tokio::task::yield_now().await;
        }
        holder.abort();
        let _ = holder.await;

        assert_eq!(group.in_flight().await, 0);
        group.acquire("t", "k").await.release().await;
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let group = Arc::new(FlightGroup::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let group = group.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let guard = group.acquire("t", "k").await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    guard.release().await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let group = FlightGroup::new();
        let first = group.acquire("t", "a").await;
        let second = tokio::time::timeout(Duration::from_millis(100), group.acquire("t", "b"))
            .await
            .expect("distinct key should not wait");
        assert_eq!(group.in_flight().await, 2);
        second.release().await;
        first.release().await;
    }
}
