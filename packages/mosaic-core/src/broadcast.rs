//! Broadcast fan-out (component C5).
//!
//! A dedicated reader task reads fixed-size chunks from the current child's
//! stdout and replicates each chunk to every active viewer queue, evicting
//! viewers whose queue has backed up rather than blocking on them. Grounded
//! in the teacher's `StreamRegistry`/`StreamState` registry-of-queues shape,
//! generalized from one broadcast channel per logical stream to one bounded
//! `mpsc` queue per viewer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol_constants::{READ_CHUNK_SIZE, VIEWER_QUEUE_CAPACITY};
use crate::utils::now_millis;

/// Opaque handle identifying a connected viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(Uuid);

impl ViewerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Viewer {
    sender: mpsc::Sender<Bytes>,
    connected_at_ms: u64,
}

/// Owns the set of connected viewers and the byte counter the watchdog
/// consults for size-based recycling. Cheap to clone (internally `Arc`'d).
#[derive(Clone)]
pub struct FanOut {
    inner: Arc<FanOutInner>,
}

struct FanOutInner {
    viewers: DashMap<ViewerId, Viewer>,
    bytes_since_start: AtomicU64,
}

/// A receiver handle returned to a newly attached viewer; dropping it
/// deregisters the viewer (the registration-pattern from §9: viewers never
/// reference the fan-out back, the fan-out holds them by handle).
pub struct ViewerHandle {
    pub id: ViewerId,
    pub receiver: mpsc::Receiver<Bytes>,
    fanout: FanOut,
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        self.fanout.remove_viewer(self.id);
    }
}

impl FanOut {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FanOutInner {
                viewers: DashMap::new(),
                bytes_since_start: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a new viewer and returns its handle.
    #[must_use]
    pub fn attach(&self) -> ViewerHandle {
        let id = ViewerId::new();
        let (tx, rx) = mpsc::channel(VIEWER_QUEUE_CAPACITY);
        self.inner.viewers.insert(
            id,
            Viewer {
                sender: tx,
                connected_at_ms: now_millis(),
            },
        );
        ViewerHandle {
            id,
            receiver: rx,
            fanout: self.clone(),
        }
    }

    fn remove_viewer(&self, id: ViewerId) {
        if self.inner.viewers.remove(&id).is_some() {
            log::debug!("[FanOut] viewer {id} disconnected");
        }
    }

    /// Drops every connected viewer, closing their queues. Used when the
    /// supervisor transitions to `idle` after an unrecoverable encoder
    /// failure — connected viewers must be disconnected cleanly (§4.8).
    pub fn disconnect_all(&self) {
        self.inner.viewers.clear();
    }

    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.inner.viewers.len()
    }

    #[must_use]
    pub fn bytes_since_start(&self) -> u64 {
        self.inner.bytes_since_start.load(Ordering::Relaxed)
    }

    pub fn reset_byte_counter(&self) {
        self.inner.bytes_since_start.store(0, Ordering::Relaxed);
    }

    /// Delivers a chunk to every viewer whose queue has room; evicts the
    /// rest. Eviction is silent to other viewers, logged here (§7 policy).
    fn distribute(&self, chunk: &Bytes) {
        self.inner
            .bytes_since_start
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);

        let mut evicted = Vec::new();
        for entry in self.inner.viewers.iter() {
            match entry.value().sender.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(*entry.key());
                }
            }
        }
        for id in evicted {
            if self.inner.viewers.remove(&id).is_some() {
                log::info!("[FanOut] evicted slow/disconnected viewer {id}");
            }
        }
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads `stdout` in fixed-size chunks until EOF, distributing each chunk to
/// every attached viewer. Returns when the child's stdout is exhausted.
pub async fn run_reader(fanout: FanOut, mut stdout: ChildStdout) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => {
                log::info!("[FanOut] encoder stdout reached EOF");
                break;
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                fanout.distribute(&chunk);
            }
            Err(e) => {
                log::warn!("[FanOut] error reading encoder stdout: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attach_and_distribute_delivers_in_order() {
        let fanout = FanOut::new();
        let mut viewer = fanout.attach();

        fanout.distribute(&Bytes::from_static(b"chunk1"));
        fanout.distribute(&Bytes::from_static(b"chunk2"));

        assert_eq!(viewer.receiver.recv().await.unwrap(), Bytes::from_static(b"chunk1"));
        assert_eq!(viewer.receiver.recv().await.unwrap(), Bytes::from_static(b"chunk2"));
    }

    #[tokio::test]
    async fn dropping_handle_removes_viewer() {
        let fanout = FanOut::new();
        let viewer = fanout.attach();
        assert_eq!(fanout.viewer_count(), 1);
        drop(viewer);
        assert_eq!(fanout.viewer_count(), 0);
    }

    #[tokio::test]
    async fn slow_viewer_is_evicted_without_blocking_others() {
        let fanout = FanOut::new();
        let slow = fanout.attach();
        let mut healthy = fanout.attach();

        // Fill the slow viewer's queue without ever draining it.
        for i in 0..VIEWER_QUEUE_CAPACITY + 5 {
            fanout.distribute(&Bytes::from(format!("chunk{i}").into_bytes()));
        }

        assert_eq!(fanout.viewer_count(), 1, "slow viewer should be evicted");
        // The healthy viewer received every chunk, in order, with no gaps.
        let first = healthy.receiver.recv().await.unwrap();
        assert_eq!(first, Bytes::from_static(b"chunk0"));
        drop(slow);
    }

    #[tokio::test]
    async fn byte_counter_tracks_distributed_bytes() {
        let fanout = FanOut::new();
        let _viewer = fanout.attach();
        fanout.distribute(&Bytes::from_static(b"12345"));
        assert_eq!(fanout.bytes_since_start(), 5);
        fanout.reset_byte_counter();
        assert_eq!(fanout.bytes_since_start(), 0);
    }
}
