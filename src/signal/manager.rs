//! `SafeManager`: the bounded queue and worker-thread pool that pull
//! signal ids off the queue and run handlers outside of signal context.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use super::Inner;

pub(crate) struct SafeManager {
    tx: Sender<i32>,
    rx: Receiver<i32>,
    _workers: Vec<JoinHandle<()>>,
}

impl SafeManager {
    pub fn new(inner: Arc<Inner>, worker_count: usize, capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let workers = (0..worker_count)
            .map(|idx| {
                let rx = rx.clone();
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("signalbus-worker-{idx}"))
                    .spawn(move || {
                        while let Ok(sig) = rx.recv() {
                            inner.dispatch_one(sig);
                        }
                    })
                    .expect("failed to spawn signalbus worker thread")
            })
            .collect();
        Self {
            tx,
            rx,
            _workers: workers,
        }
    }

    /// Enqueues a signal id. Returns `false` if the bounded queue is full
    /// and the arrival must be counted as dropped.
    pub fn enqueue(&self, sig: i32) -> bool {
        self.tx.try_send(sig).is_ok()
    }

    /// Discards whatever is currently queued, returning the count removed.
    pub fn clear(&self) -> usize {
        let mut n = 0;
        while self.rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}
