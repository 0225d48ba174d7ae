//! Depth-tracked channels
//!
//! Thin wrappers over tokio's unbounded mpsc channel that keep a shared count
//! of queued messages, so the termination check can see whether anything is
//! still in flight between the orchestrator and the workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Creates a tracked unbounded channel
pub fn tracked_channel<T>() -> (TrackedSender<T>, TrackedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        TrackedSender {
            tx,
            depth: Arc::clone(&depth),
        },
        TrackedReceiver { rx, depth },
    )
}

/// Read-only view of a channel's queue depth
#[derive(Debug, Clone)]
pub struct ChannelDepth(Arc<AtomicUsize>);

impl ChannelDepth {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct TrackedSender<T> {
    tx: mpsc::UnboundedSender<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> Clone for TrackedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            depth: Arc::clone(&self.depth),
        }
    }
}

impl<T> TrackedSender<T> {
    /// Queues a message; returns false if the receiver is gone
    pub fn send(&self, message: T) -> bool {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(message).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> ChannelDepth {
        ChannelDepth(Arc::clone(&self.depth))
    }
}

/// Result of a bounded receive
#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    Message(T),
    Timeout,
    /// Every sender has been dropped
    Closed,
}

#[derive(Debug)]
pub struct TrackedReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> TrackedReceiver<T> {
    /// Waits for the next message; `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<T> {
        let message = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(message)
    }

    /// Waits at most `timeout` for the next message
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Recv<T> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Some(message)) => Recv::Message(message),
            Ok(None) => Recv::Closed,
            Err(_) => Recv::Timeout,
        }
    }

    /// Takes a message if one is queued, without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        let message = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(message)
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
