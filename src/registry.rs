// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection completion registry: an add table keyed uniquely by
//! `(ledger, entry)`, and a read table keyed the same way but holding an
//! insertion-ordered sequence, since concurrent reads for the same key are
//! allowed.

use std::{collections::VecDeque, sync::Mutex, time::Instant};

use dashmap::DashMap;
use tracing::{error, warn};

use crate::model::{Completion, EntryId, LedgerId, OpKind, RequestKey, LAST_ADD_CONFIRMED};

#[derive(Default)]
pub struct CompletionRegistry {
    adds: DashMap<RequestKey, Completion>,
    reads: DashMap<RequestKey, Mutex<VecDeque<Completion>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an add completion. A prior entry at the same key should
    /// never exist under correct caller use (at most one concurrent add per
    /// key is expected); if it does, the new entry overwrites and the
    /// previous one is abandoned. This is a caller bug, logged loudly
    /// rather than silently swallowed.
    pub fn register_add(&self, key: RequestKey, c: Completion) {
        if let Some((_, abandoned)) = self.adds.remove(&key) {
            error!(
                ledger = key.ledger,
                entry = key.entry,
                "register_add: overwriting an already-pending add completion; the \
                 previous caller's callback will never fire through the normal \
                 response path (caller submitted two concurrent adds for the same key)"
            );
            drop(abandoned);
        }
        self.adds.insert(key, c);
    }

    /// Appends a read completion to the insertion-ordered sequence at `key`.
    pub fn register_read(&self, key: RequestKey, c: Completion) {
        self.reads
            .entry(key)
            .or_default()
            .lock()
            .expect("read queue mutex poisoned")
            .push_back(c);
    }

    /// Atomically removes the add completion at `key`, if any.
    pub fn take_add(&self, key: RequestKey) -> Option<Completion> {
        self.adds.remove(&key).map(|(_, c)| c)
    }

    /// Atomically removes the head of the read sequence at `key`.
    pub fn take_read(&self, key: RequestKey) -> Option<Completion> {
        let front = self
            .reads
            .get(&key)
            .and_then(|queue| queue.lock().expect("read queue mutex poisoned").pop_front());
        if front.is_some() {
            self.prune_if_empty(key);
        }
        front
    }

    /// Response handling for a READ_ENTRY reply: tries the head of the
    /// sequence for the response's own `(ledger, entry)` first, and falls
    /// back to the sentinel-keyed sequence `(ledger, LAST_ADD_CONFIRMED)`
    /// when that's empty — this is how a ledger-recovery read submitted
    /// with the sentinel entry id gets matched to a response carrying the
    /// concrete entry id the server resolved it to.
    pub fn take_read_with_lac_fallback(
        &self,
        ledger: LedgerId,
        entry: EntryId,
    ) -> Option<Completion> {
        if let Some(c) = self.take_read(RequestKey::new(ledger, entry)) {
            return Some(c);
        }
        if entry == LAST_ADD_CONFIRMED {
            return None;
        }
        self.take_read(RequestKey::new(ledger, LAST_ADD_CONFIRMED))
    }

    fn prune_if_empty(&self, key: RequestKey) {
        self.reads
            .remove_if(&key, |_, queue| {
                queue.lock().expect("read queue mutex poisoned").is_empty()
            });
    }

    /// Scans both tables and atomically removes every completion whose
    /// deadline has passed. Tolerant of concurrent removal by a response or
    /// another scan: missing entries are simply skipped.
    pub fn drain_expired(&self, now: Instant) -> Vec<(RequestKey, Completion, OpKind)> {
        let mut expired = Vec::new();

        let add_keys: Vec<RequestKey> = self
            .adds
            .iter()
            .filter(|e| e.value().deadline <= now)
            .map(|e| *e.key())
            .collect();
        for key in add_keys {
            if let Some((_, c)) = self.adds.remove_if(&key, |_, c| c.deadline <= now) {
                expired.push((key, c, OpKind::Add));
            }
        }

        let read_keys: Vec<RequestKey> = self.reads.iter().map(|e| *e.key()).collect();
        for key in read_keys {
            let Some(queue) = self.reads.get(&key) else {
                continue;
            };
            let mut q = queue.lock().expect("read queue mutex poisoned");
            let mut kept = VecDeque::with_capacity(q.len());
            while let Some(c) = q.pop_front() {
                if c.deadline <= now {
                    expired.push((key, c, OpKind::Read));
                } else {
                    kept.push_back(c);
                }
            }
            *q = kept;
            drop(q);
            drop(queue);
            self.prune_if_empty(key);
        }

        if !expired.is_empty() {
            warn!(count = expired.len(), "drain_expired: timed out completions");
        }
        expired
    }

    /// Atomically drains every pending completion of the given kind (used
    /// on disconnect/close).
    pub fn drain_all(&self, kind: OpKind) -> Vec<(RequestKey, Completion)> {
        match kind {
            OpKind::Add => {
                let keys: Vec<RequestKey> = self.adds.iter().map(|e| *e.key()).collect();
                keys.into_iter()
                    .filter_map(|key| self.adds.remove(&key).map(|(_, c)| (key, c)))
                    .collect()
            },
            OpKind::Read => {
                let keys: Vec<RequestKey> = self.reads.iter().map(|e| *e.key()).collect();
                let mut out = Vec::new();
                for key in keys {
                    if let Some((_, queue)) = self.reads.remove(&key) {
                        let queue = queue.into_inner().expect("read queue mutex poisoned");
                        out.extend(queue.into_iter().map(|c| (key, c)));
                    }
                }
                out
            },
        }
    }
}
