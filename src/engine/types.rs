// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the access engine.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::Stream;

use crate::error::{AccessError, Result};

/// Engine lifecycle state.
///
/// Use [`super::AccessEngine::state()`] to check the current state or
/// [`super::AccessEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built, not yet started
    Created,
    /// Opening stores
    Starting,
    /// Serving requests, redelivery loop active
    Running,
    /// Stopping the redelivery loop
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Progress and completion of a file transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress { transferred: u64, total: Option<u64> },
    /// Server response to an upload
    Uploaded(Value),
    /// Where a download was written
    Downloaded(PathBuf),
}

/// Where engine work runs.
///
/// All tier I/O runs on `background`. When `delivery` is set, results are
/// forwarded to the caller's stream from a task on that runtime instead.
#[derive(Debug, Clone)]
pub struct Schedulers {
    pub background: Handle,
    pub delivery: Option<Handle>,
}

impl Schedulers {
    /// Everything on the current runtime.
    pub fn current() -> Result<Self> {
        let background = Handle::try_current()
            .map_err(|e| AccessError::Configuration(format!("no tokio runtime: {e}")))?;
        Ok(Self {
            background,
            delivery: None,
        })
    }

    /// Run `task` on the background runtime, handing it the sending half of
    /// the returned stream. With `cancel_on_drop`, dropping the stream
    /// aborts the task; otherwise the task runs to completion regardless.
    pub(crate) fn spawn_stream<T, F, Fut>(&self, cancel_on_drop: bool, task: F) -> ResultStream<T>
    where
        T: Send + 'static,
        F: FnOnce(Emitter<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);

        let producer_tx = match &self.delivery {
            None => tx,
            Some(delivery) => {
                let (inner_tx, mut inner_rx) = mpsc::channel::<Result<T>>(STREAM_CAPACITY);
                delivery.spawn(async move {
                    while let Some(item) = inner_rx.recv().await {
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                });
                inner_tx
            }
        };

        let handle = self.background.spawn(task(Emitter { tx: producer_tx }));
        ResultStream {
            rx,
            abort: cancel_on_drop.then(|| handle.abort_handle()),
        }
    }

    /// [`spawn_stream`](Self::spawn_stream) for work with one outcome.
    pub(crate) fn spawn_once<T, Fut>(&self, cancel_on_drop: bool, fut: Fut) -> ResultStream<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.spawn_stream(cancel_on_drop, move |emitter| async move {
            emitter.emit(fut.await).await;
        })
    }
}

const STREAM_CAPACITY: usize = 16;

/// Sending half of a [`ResultStream`].
pub(crate) struct Emitter<T> {
    tx: mpsc::Sender<Result<T>>,
}

impl<T> Emitter<T> {
    /// Deliver one item. A closed stream is not an error: the caller stopped
    /// listening.
    pub(crate) async fn emit(&self, item: Result<T>) {
        let _ = self.tx.send(item).await;
    }

    /// Deliver without waiting; dropped when the stream is full.
    pub(crate) fn try_emit(&self, item: Result<T>) {
        let _ = self.tx.try_send(item);
    }
}

/// Asynchronous results of one engine call.
///
/// Reads and writes yield a single item; transfers yield progress events
/// followed by a completion event. Dropping a read stream cancels the read.
pub struct ResultStream<T> {
    rx: mpsc::Receiver<Result<T>>,
    abort: Option<AbortHandle>,
}

impl<T> ResultStream<T> {
    /// A stream that yields `result` and ends.
    pub(crate) fn ready(result: Result<T>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(result);
        Self { rx, abort: None }
    }

    /// Next item, or `None` once the producer finished.
    pub async fn next_result(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    /// The first item. `Cancelled` if the producer ended without one.
    pub async fn single(mut self) -> Result<T> {
        self.rx.recv().await.unwrap_or(Err(AccessError::Cancelled))
    }

    /// The last item, stopping at the first error.
    pub async fn finish(mut self) -> Result<T> {
        let mut last = None;
        while let Some(item) = self.rx.recv().await {
            last = Some(item?);
        }
        last.ok_or(AccessError::Cancelled)
    }
}

impl<T> Stream for ResultStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for ResultStream<T> {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(EngineState::Created.to_string(), "Created");
        assert_eq!(EngineState::ShuttingDown.to_string(), "ShuttingDown");
    }

    #[tokio::test]
    async fn test_ready_stream_yields_once() {
        let mut stream = ResultStream::ready(Ok(5));
        assert_eq!(stream.next().await, Some(Ok(5)));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_finish_returns_last_item() {
        let schedulers = Schedulers::current().unwrap();
        let stream = schedulers.spawn_stream(false, |emitter| async move {
            for i in 0..3 {
                emitter.emit(Ok(i)).await;
            }
        });
        assert_eq!(stream.finish().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_drop_cancels_when_asked() {
        let schedulers = Schedulers::current().unwrap();
        let finished = Arc::new(AtomicBool::new(false));

        let done = finished.clone();
        let stream: ResultStream<()> = schedulers.spawn_once(true, async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            done.store(true, Ordering::SeqCst);
            Ok(())
        });
        drop(stream);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_detached_task_survives_drop() {
        let schedulers = Schedulers::current().unwrap();
        let finished = Arc::new(AtomicBool::new(false));

        let done = finished.clone();
        let stream: ResultStream<()> = schedulers.spawn_once(false, async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            done.store(true, Ordering::SeqCst);
            Ok(())
        });
        drop(stream);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_delivery_handle_forwards() {
        let schedulers = Schedulers {
            delivery: Some(Handle::current()),
            ..Schedulers::current().unwrap()
        };
        let stream = schedulers.spawn_once(true, async { Ok("hi") });
        assert_eq!(stream.single().await.unwrap(), "hi");
    }
}
