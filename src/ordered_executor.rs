// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Keyed FIFO callback delivery. All user callbacks are invoked exclusively
//! from here, never from the reactor or timer tasks.
//!
//! A fixed number of workers, each backed by its own ordered channel;
//! `submit_ordered(key, task)` hashes `key` to a worker and sends. Two
//! tasks submitted with the same key land on the same worker and therefore
//! run in submission order; different keys may run concurrently on
//! different workers.

use std::{
    hash::{Hash, Hasher},
    num::NonZeroUsize,
};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tracing::warn;

use crate::error::BkError;

type Task = Box<dyn FnOnce() + Send + 'static>;

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

struct Worker {
    tx: mpsc::UnboundedSender<Task>,
    handle: JoinHandle<()>,
}

/// A worker-pool abstraction that serializes tasks sharing a key and
/// parallelizes across keys.
pub struct OrderedExecutor {
    workers: Vec<Worker>,
}

impl OrderedExecutor {
    /// Builds an executor with `worker_count` workers. Exceptions raised
    /// inside a submitted task are caught and logged; they never take a
    /// worker down.
    pub fn new(worker_count: NonZeroUsize) -> Self {
        let workers = (0..worker_count.get())
            .map(|idx| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
                let handle = tokio::spawn(async move {
                    while let Some(task) = rx.recv().await {
                        if let Err(panic) =
                            std::panic::catch_unwind(std::panic::AssertUnwindSafe(task))
                        {
                            let msg = panic_message(&panic);
                            warn!(worker = idx, msg, "ordered executor task panicked");
                        }
                    }
                });
                Worker { tx, handle }
            })
            .collect();
        Self { workers }
    }

    /// Number of backing workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Submits `task` to the worker owning `key`. Tasks submitted with the
    /// same key execute in submission order.
    pub fn submit_ordered(
        &self,
        key: u64,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), BkError> {
        let idx = self.worker_index(key);
        self.workers[idx]
            .tx
            .send(Box::new(task))
            .map_err(|_| BkError::Interrupted)
    }

    fn worker_index(&self, key: u64) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.workers.len()
    }

    /// Drops all senders (so each worker's recv loop drains and exits) and
    /// awaits every worker task, bounded by the caller via `tokio::time::timeout`.
    pub async fn shutdown(self) {
        // Dropping `self.workers`' senders happens as each Worker is
        // consumed below; collect handles first so we can await them.
        let mut handles = Vec::with_capacity(self.workers.len());
        for w in self.workers {
            drop(w.tx);
            handles.push(w.handle);
        }
        for h in handles {
            let _ = h.await;
        }
    }
}
