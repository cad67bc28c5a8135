// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Core data model shared by the registry, connection, pool, and facade
//! layers: server addressing, ledger/entry identifiers, the completion
//! record, and the pending-op envelope used while a connection has not yet
//! reached `CONNECTED`.

use std::{
    any::Any,
    fmt,
    net::ToSocketAddrs,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;

use crate::error::BkError;

/// Identifies one append-only ledger.
pub type LedgerId = u64;

/// Identifies one entry inside a ledger.
pub type EntryId = u64;

/// Sentinel entry id: "whichever entry is currently the last committed one".
pub const LAST_ADD_CONFIRMED: EntryId = u64::MAX;

/// Host + port identifying a storage node. Used as the equality key for
/// per-server pool lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: Arc<str>,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<Arc<str>>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolves this address through the standard library resolver. A pool
    /// is constructed once per `ServerAddress`, so the resolution cost is
    /// paid once per live connection, not once per request.
    pub fn to_socket_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        (self.host.as_ref(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses resolved for {self}"),
                )
            })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Correlation key for the completion registry: (ledger, entry). Multiple
/// concurrent reads for the same key queue in insertion order; at most one
/// concurrent add per key is expected (caller-enforced, not registry-enforced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub ledger: LedgerId,
    pub entry: EntryId,
}

impl RequestKey {
    pub fn new(ledger: LedgerId, entry: EntryId) -> Self {
        Self { ledger, entry }
    }
}

/// Which half of the registry a `Completion` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Read,
}

/// Opaque user context threaded back through the callback untouched.
pub type CallbackCtx = Arc<dyn Any + Send + Sync>;

/// Result payload handed to a write callback: the resolved code, the
/// (ledger, entry) it answers, and the server that answered (or would have).
pub type WriteCallback =
    Box<dyn FnOnce(Result<(), BkError>, LedgerId, EntryId, ServerAddress, CallbackCtx) + Send>;

/// Result payload handed to a read callback. On success the body is the raw
/// entry bytes; callers must copy out of the slice before returning since
/// the backing frame buffer is dropped once the callback returns.
pub type ReadCallback = Box<
    dyn FnOnce(Result<Bytes, BkError>, LedgerId, EntryId, ServerAddress, CallbackCtx) + Send,
>;

/// A pending completion: the callback to invoke plus the bookkeeping needed
/// for latency stats and timeout scanning.
pub struct Completion {
    pub kind: OpKind,
    pub submitted_at: Instant,
    pub deadline: Instant,
    pub(crate) inner: CompletionCallback,
}

pub(crate) enum CompletionCallback {
    Add {
        cb: WriteCallback,
        ctx: CallbackCtx,
    },
    Read {
        cb: ReadCallback,
        ctx: CallbackCtx,
    },
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("kind", &self.kind)
            .field("submitted_at", &self.submitted_at)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Completion {
    pub fn new_add(
        timeout: Duration,
        ctx: CallbackCtx,
        cb: WriteCallback,
    ) -> Self {
        let now = Instant::now();
        Self {
            kind: OpKind::Add,
            submitted_at: now,
            deadline: now + timeout,
            inner: CompletionCallback::Add { cb, ctx },
        }
    }

    pub fn new_read(
        timeout: Duration,
        ctx: CallbackCtx,
        cb: ReadCallback,
    ) -> Self {
        let now = Instant::now();
        Self {
            kind: OpKind::Read,
            submitted_at: now,
            deadline: now + timeout,
            inner: CompletionCallback::Read { cb, ctx },
        }
    }

    /// Resolves this completion with a failure code. Consumes self so a
    /// given `Completion` can only ever be resolved once.
    pub fn fail(self, err: BkError, ledger: LedgerId, entry: EntryId, addr: ServerAddress) {
        match self.inner {
            CompletionCallback::Add { cb, ctx } => cb(Err(err), ledger, entry, addr, ctx),
            CompletionCallback::Read { cb, ctx } => cb(Err(err), ledger, entry, addr, ctx),
        }
    }

    /// Resolves an add completion with a successful status.
    pub fn complete_add(self, ledger: LedgerId, entry: EntryId, addr: ServerAddress) {
        match self.inner {
            CompletionCallback::Add { cb, ctx } => cb(Ok(()), ledger, entry, addr, ctx),
            CompletionCallback::Read { cb, ctx } => {
                // Caller-side misuse: a read completion was resolved via the
                // add path. Still honor "exactly once" by failing it loudly.
                tracing::error!("complete_add invoked on a Read completion; dropping payload");
                cb(Err(BkError::ReadFailure), ledger, entry, addr, ctx)
            },
        }
    }

    /// Resolves a read completion with the entry body.
    pub fn complete_read(
        self,
        ledger: LedgerId,
        entry: EntryId,
        addr: ServerAddress,
        body: Bytes,
    ) {
        match self.inner {
            CompletionCallback::Read { cb, ctx } => cb(Ok(body), ledger, entry, addr, ctx),
            CompletionCallback::Add { cb, ctx } => {
                tracing::error!("complete_read invoked on an Add completion");
                cb(Err(BkError::WriteFailure), ledger, entry, addr, ctx)
            },
        }
    }
}

/// Outcome delivered to a deferred op once the connection leaves the
/// queueing states (CONNECTING/AUTHENTICATING/DISCONNECTED).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOpOutcome {
    Ok,
    Failed(BkError),
}

/// A deferred invocation captured while the connection is not yet
/// `CONNECTED`; fired with `Ok` (go ahead and write) or `Failed(code)`.
pub type PendingOp = Box<dyn FnOnce(PendingOpOutcome) + Send>;
