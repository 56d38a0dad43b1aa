// FIFO command queue feeding the executor.
//
// The queue is unbounded: producers never block and never fail while the
// executor is alive. Depth is tracked so a burst (e.g. many subscribers
// joining at once) shows up in the logs once it crosses the high-water mark.

use crate::client::command::Command;
use crate::config::DEFAULT_QUEUE_HIGH_WATER_MARK;
use crate::error::ClientError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct QueueDepth {
    current: AtomicUsize,
    high_water: AtomicUsize,
    warned: AtomicBool,
}

impl QueueDepth {
    fn pushed(&self) {
        let depth = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        let high_water = self.high_water.load(Ordering::Relaxed);
        if depth > high_water && !self.warned.swap(true, Ordering::AcqRel) {
            warn!("executor queue depth {depth} exceeds high-water mark {high_water}");
        }
    }

    fn popped(&self) {
        let depth = self.current.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        let low_water = self.high_water.load(Ordering::Relaxed) / 2;
        if depth <= low_water && self.warned.swap(false, Ordering::AcqRel) {
            debug!("executor queue drained to {depth}");
        }
    }

    fn undo_push(&self) {
        self.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Producer side held by the facade. Owning one keeps the executor alive.
pub(crate) struct CommandQueue {
    tx: mpsc::UnboundedSender<Command>,
    depth: Arc<QueueDepth>,
}

impl CommandQueue {
    pub(crate) fn send(&self, command: Command) -> Result<(), ClientError> {
        self.depth.pushed();
        self.tx.send(command).map_err(|_| {
            self.depth.undo_push();
            ClientError::WorkerGone
        })
    }

    pub(crate) fn downgrade(&self) -> WeakCommandQueue {
        WeakCommandQueue {
            tx: self.tx.downgrade(),
            depth: self.depth.clone(),
        }
    }
}

/// Producer side held by the executor itself, engine observers and stats
/// timers. It does not keep the executor alive.
#[derive(Clone)]
pub(crate) struct WeakCommandQueue {
    tx: mpsc::WeakUnboundedSender<Command>,
    depth: Arc<QueueDepth>,
}

impl WeakCommandQueue {
    /// Returns false once the executor is gone.
    pub(crate) fn send(&self, command: Command) -> bool {
        let Some(tx) = self.tx.upgrade() else {
            return false;
        };
        self.depth.pushed();
        if tx.send(command).is_err() {
            self.depth.undo_push();
            return false;
        }
        true
    }

    pub(crate) fn set_high_water_mark(&self, mark: usize) {
        self.depth.high_water.store(mark.max(1), Ordering::Relaxed);
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.current.load(Ordering::Acquire)
    }
}

pub(crate) struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
    depth: Arc<QueueDepth>,
}

impl CommandReceiver {
    pub(crate) async fn recv(&mut self) -> Option<Command> {
        let command = self.rx.recv().await?;
        self.depth.popped();
        Some(command)
    }
}

pub(crate) fn channel() -> (CommandQueue, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(QueueDepth {
        current: AtomicUsize::new(0),
        high_water: AtomicUsize::new(DEFAULT_QUEUE_HIGH_WATER_MARK),
        warned: AtomicBool::new(false),
    });
    (
        CommandQueue {
            tx,
            depth: depth.clone(),
        },
        CommandReceiver { rx, depth },
    )
}
