//! Bounded multi-consumer work queue with completion tracking.
//!
//! One producer [`put`](TaskQueue::put)s tasks, any number of workers
//! [`get`](TaskQueue::get) them and [`ack`](TaskQueue::ack) each one once
//! processed. [`join_all`](TaskQueue::join_all) resolves when every task put
//! so far has been acknowledged. Shutdown is an explicit
//! [`Dequeued::Closed`] signal, sent once per worker with
//! [`close`](TaskQueue::close), never a special task value.

use tokio::sync::{mpsc, watch, Mutex};

use framefarm_core::types::Task;

/// Default number of tasks buffered ahead of the workers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// What a worker receives from [`TaskQueue::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    Task(Task),
    /// No more work for this worker; leave the processing loop.
    Closed,
}

pub struct TaskQueue {
    sender: mpsc::Sender<Dequeued>,
    receiver: Mutex<mpsc::Receiver<Dequeued>>,
    /// Tasks put but not yet acknowledged.
    outstanding: watch::Sender<usize>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl TaskQueue {
    /// Create a queue buffering at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (outstanding, _) = watch::channel(0);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            outstanding,
        }
    }

    /// Enqueue a task, waiting while the queue is full.
    pub async fn put(&self, task: Task) {
        self.outstanding.send_modify(|n| *n += 1);
        if self.sender.send(Dequeued::Task(task)).await.is_err() {
            // The receiver lives in `self`; only reachable during teardown.
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    /// Take the next item, waiting until one is available.
    ///
    /// Each item is handed to exactly one caller.
    pub async fn get(&self) -> Dequeued {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.unwrap_or(Dequeued::Closed)
    }

    /// Mark one previously received task as processed.
    pub fn ack(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Number of tasks put but not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Wait until every task put so far has been acknowledged.
    pub async fn join_all(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender is owned by `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Send one close signal per consumer. Signals queue up behind any
    /// remaining tasks, so a worker only leaves once those are taken. With
    /// no live consumer and a full queue this waits forever.
    pub async fn close(&self, consumers: usize) {
        for _ in 0..consumers {
            if self.sender.send(Dequeued::Closed).await.is_err() {
                break;
            }
        }
    }
}
