// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared in-flight requests with replay.
//!
//! Concurrent subscribers for the same key share one producer:
//!
//! ```text
//!  subscribe(k) ──► cell missing ──► new cell, spawn producer ─┐
//!  subscribe(k) ──► cell pending ──► register waiter ──────────┤
//!                                                              ▼
//!                                              producer done: every waiter
//!                                              gets a clone of the outcome
//!  subscribe(k) ──► cell ready ──► immediate replay
//!
//!  last subscription dropped ──► cell removed, unfinished producer aborted
//! ```
//!
//! Each cell is guarded by a single `parking_lot::Mutex`. The registry is a
//! `DashMap`; lock order is always shard then cell.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::error::{AccessError, Result};

enum Outcome<T> {
    Pending(Vec<oneshot::Sender<Result<T>>>),
    Ready(Result<T>),
}

struct CellState<T> {
    refs: usize,
    outcome: Outcome<T>,
    abort: Option<AbortHandle>,
}

struct Cell<T> {
    state: Mutex<CellState<T>>,
}

impl<T: Clone> Cell<T> {
    fn complete(&self, result: Result<T>) {
        let mut state = self.state.lock();
        let waiters = match std::mem::replace(&mut state.outcome, Outcome::Ready(result.clone())) {
            Outcome::Pending(waiters) => waiters,
            Outcome::Ready(_) => Vec::new(),
        };
        state.abort = None;
        drop(state);

        for waiter in waiters {
            // Receiver gone means that subscriber already dropped
            let _ = waiter.send(result.clone());
        }
    }
}

/// Registry of in-flight (or completed and still observed) producers.
pub struct Multicast<K, T> {
    cells: Arc<DashMap<K, Arc<Cell<T>>>>,
    handle: Handle,
}

impl<K, T> Clone for Multicast<K, T> {
    fn clone(&self) -> Self {
        Self {
            cells: Arc::clone(&self.cells),
            handle: self.handle.clone(),
        }
    }
}

impl<K, T> Multicast<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    /// Producers run on `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            cells: Arc::new(DashMap::new()),
            handle,
        }
    }

    /// Number of live cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Join the cell for `key`, starting `producer` only if no cell is live.
    pub fn subscribe<F, Fut>(&self, key: K, producer: F) -> Subscription<K, T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let cell = match self.cells.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let cell = Arc::clone(entry.get());
                let mut state = cell.state.lock();
                state.refs += 1;
                match &mut state.outcome {
                    Outcome::Pending(waiters) => waiters.push(tx),
                    Outcome::Ready(result) => {
                        let _ = tx.send(result.clone());
                    }
                }
                drop(state);
                crate::metrics::record_multicast("joined");
                trace!("Joined in-flight request");
                cell
            }
            Entry::Vacant(entry) => {
                let cell = Arc::new(Cell {
                    state: Mutex::new(CellState {
                        refs: 1,
                        outcome: Outcome::Pending(vec![tx]),
                        abort: None,
                    }),
                });

                let fut = producer();
                let completing = Arc::clone(&cell);
                let task = self.handle.spawn(async move {
                    let result = fut.await;
                    completing.complete(result);
                });

                {
                    let mut state = cell.state.lock();
                    if matches!(state.outcome, Outcome::Pending(_)) {
                        state.abort = Some(task.abort_handle());
                    }
                }
                entry.insert(Arc::clone(&cell));
                crate::metrics::record_multicast("started");
                trace!("Started shared request");
                cell
            }
        };

        Subscription {
            rx,
            key: Some(key),
            cell,
            cells: Arc::clone(&self.cells),
        }
    }
}

/// One observer of a shared request. Dropping it releases the cell.
pub struct Subscription<K, T>
where
    K: Eq + Hash,
{
    rx: oneshot::Receiver<Result<T>>,
    key: Option<K>,
    cell: Arc<Cell<T>>,
    cells: Arc<DashMap<K, Arc<Cell<T>>>>,
}

impl<K, T> Subscription<K, T>
where
    K: Eq + Hash,
{
    /// Wait for the shared outcome.
    pub async fn recv(&mut self) -> Result<T> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(AccessError::Cancelled),
        }
    }
}

impl<K, T> Drop for Subscription<K, T>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let last = {
            let mut state = self.cell.state.lock();
            state.refs = state.refs.saturating_sub(1);
            state.refs == 0
        };
        if !last {
            return;
        }
        let Some(key) = self.key.take() else {
            return;
        };

        let removed = self.cells.remove_if(&key, |_, cell| {
            Arc::ptr_eq(cell, &self.cell) && cell.state.lock().refs == 0
        });
        if removed.is_some() {
            if let Some(abort) = self.cell.state.lock().abort.take() {
                abort.abort();
                trace!("Aborted unobserved request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn multicast() -> Multicast<String, u32> {
        Multicast::new(Handle::current())
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_share_one_producer() {
        let mc = multicast();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let start = |calls: Arc<AtomicUsize>, gate: Arc<Notify>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(7)
            }
        };

        let mut a = mc.subscribe("k".to_string(), start(calls.clone(), gate.clone()));
        let mut b = mc.subscribe("k".to_string(), start(calls.clone(), gate.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.notify_one();

        assert_eq!(a.recv().await.unwrap(), 7);
        assert_eq!(b.recv().await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_replay() {
        let mc = multicast();
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        };

        let mut first = mc.subscribe("k".to_string(), counted(calls.clone()));
        assert_eq!(first.recv().await.unwrap(), 1);

        // First subscription is still held, so the cell is still live
        let mut late = mc.subscribe("k".to_string(), counted(calls.clone()));
        assert_eq!(late.recv().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_replayed() {
        let mc = multicast();
        let mut a = mc.subscribe("k".to_string(), || async { Err(AccessError::transport("offline")) });
        let mut b = mc.subscribe("k".to_string(), || async { Ok(0) });

        assert!(a.recv().await.unwrap_err().is_retryable());
        assert!(b.recv().await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_last_drop_removes_cell_and_restarts() {
        let mc = multicast();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let mut sub = mc.subscribe("k".to_string(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            });
            assert_eq!(sub.recv().await.unwrap(), 2);
            drop(sub);
            assert!(mc.is_empty());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_drop_aborts_unfinished_producer() {
        let mc = multicast();
        let finished = Arc::new(AtomicUsize::new(0));

        let done = finished.clone();
        let sub = mc.subscribe("k".to_string(), move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            done.fetch_add(1, Ordering::SeqCst);
            Ok(3)
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(sub);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(mc.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let mc = multicast();
        let mut a = mc.subscribe("a".to_string(), || async { Ok(1) });
        let mut b = mc.subscribe("b".to_string(), || async { Ok(2) });

        assert_eq!(a.recv().await.unwrap(), 1);
        assert_eq!(b.recv().await.unwrap(), 2);
        assert_eq!(mc.len(), 2);
    }
}
