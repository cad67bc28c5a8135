// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection client: one TCP connection to one server, its state
//! machine, pending-op queue, completion registry, and the auth shuttle run
//! against an `AuthProvider`.
//!
//! A write half behind a `tokio::sync::Mutex`, a background read-loop task
//! spawned on connect, and a `CancellationToken` used to tear a connection
//! down without racing the reader. The higher layer here never awaits a
//! reply inline — every response and timeout resolves a previously
//! registered `Completion` through the ordered executor.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};
use tokio_stream::StreamExt;
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, error, warn};

use crate::{
    auth::{AuthProvider, AuthProviderFactory},
    config::ClientConfig,
    error::BkError,
    model::{
        CallbackCtx, Completion, EntryId, LedgerId, OpKind, PendingOp, PendingOpOutcome,
        ReadCallback, RequestKey, ServerAddress, WriteCallback,
    },
    ordered_executor::OrderedExecutor,
    registry::CompletionRegistry,
    stats::SharedStatsSink,
    wire::{
        codec::FrameCodec,
        header::Opcode,
        request::{encode_add_entry, encode_auth, encode_read_entry, encode_read_entry_and_fence,
                  encode_trim},
        response::{parse_auth_payload, parse_op_response},
        MASTER_KEY_LEN,
    },
};

/// The PCC's four live states plus the terminal `CLOSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Closed,
}

struct Inner {
    state: ConnectionState,
    pending_ops: Vec<PendingOp>,
    /// Bumped every time the state leaves `Disconnected` for `Connecting`.
    /// A connect attempt captures the epoch it was spawned under; on
    /// completion it checks the epoch still matches before touching state,
    /// so a delayed/secondary connect never clobbers a connection that has
    /// already moved on: a late connect attempt is closed without
    /// disturbing the live connection.
    epoch: u64,
}

struct AuthSlot {
    provider: Option<Box<dyn AuthProvider>>,
    started_at: Option<Instant>,
}

pub struct PerConnectionClient {
    addr: ServerAddress,
    cfg: Arc<ClientConfig>,
    auth_factory: Arc<dyn AuthProviderFactory>,
    executor: Arc<OrderedExecutor>,
    stats: SharedStatsSink,
    registry: CompletionRegistry,
    inner: StdMutex<Inner>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    auth: Mutex<AuthSlot>,
    cancel: StdMutex<CancellationToken>,
    next_epoch: AtomicU64,
    /// Mirrors the facade's `closed` flag: once the facade is closed, every
    /// non-OK resolution is rewritten to `ClientClosed` regardless of its
    /// original cause.
    facade_closed: Arc<AtomicBool>,
}

impl PerConnectionClient {
    pub fn new(
        addr: ServerAddress,
        cfg: Arc<ClientConfig>,
        auth_factory: Arc<dyn AuthProviderFactory>,
        executor: Arc<OrderedExecutor>,
        stats: SharedStatsSink,
        facade_closed: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            addr,
            cfg,
            auth_factory,
            executor,
            stats,
            registry: CompletionRegistry::new(),
            inner: StdMutex::new(Inner {
                state: ConnectionState::Disconnected,
                pending_ops: Vec::new(),
                epoch: 0,
            }),
            writer: Mutex::new(None),
            auth: Mutex::new(AuthSlot {
                provider: None,
                started_at: None,
            }),
            cancel: StdMutex::new(CancellationToken::new()),
            next_epoch: AtomicU64::new(1),
            facade_closed,
        })
    }

    /// Rewrites `err` to `ClientClosed` if the owning facade has been
    /// closed; used at every point a completion is about to resolve
    /// non-OK.
    fn shape_error(&self, err: BkError) -> BkError {
        if self.facade_closed.load(Ordering::Acquire) {
            BkError::ClientClosed
        } else {
            err
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.addr
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().expect("state mutex poisoned").state
    }

    /// Gate every operation must pass through before touching the wire.
    /// `CONNECTED` dispatches `op` immediately; `CLOSED` fails it immediately;
    /// the queueing states append it to `pending_ops`, triggering a connect
    /// attempt if none is already underway.
    pub fn enqueue_or_dispatch(self: &Arc<Self>, op: PendingOp) {
        let mut inner = self.inner.lock().expect("state mutex poisoned");
        match inner.state {
            ConnectionState::Connected => {
                drop(inner);
                op(PendingOpOutcome::Ok);
            },
            ConnectionState::Closed => {
                drop(inner);
                op(PendingOpOutcome::Failed(BkError::ClientClosed));
            },
            ConnectionState::Connecting | ConnectionState::Authenticating => {
                inner.pending_ops.push(op);
            },
            ConnectionState::Disconnected => {
                inner.pending_ops.push(op);
                inner.state = ConnectionState::Connecting;
                let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
                inner.epoch = epoch;
                drop(inner);
                let this = self.clone();
                tokio::spawn(async move { this.connect_and_auth(epoch).await });
            },
        }
    }

    async fn connect_and_auth(self: Arc<Self>, epoch: u64) {
        let socket_addr: SocketAddr = match self.addr.to_socket_addr() {
            Ok(a) => a,
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "address resolution failed");
                self.fail_connect(epoch);
                return;
            },
        };

        let stream = match TcpStream::connect(socket_addr).await {
            Ok(s) => s,
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "connect failed");
                self.fail_connect(epoch);
                return;
            },
        };
        if self.cfg.tcp_nodelay {
            let _ = stream.set_nodelay(true);
        }

        {
            let mut inner = self.inner.lock().expect("state mutex poisoned");
            if inner.epoch != epoch || inner.state != ConnectionState::Connecting {
                debug!(addr = %self.addr, "closing stale or secondary connect attempt");
                return;
            }
            inner.state = ConnectionState::Authenticating;
        }

        let (r, w) = stream.into_split();
        *self.writer.lock().await = Some(w);

        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = cancel.clone();

        let reader = self.clone();
        tokio::spawn(async move { reader.read_loop(r, cancel).await });

        self.start_auth(epoch).await;
    }

    fn fail_connect(self: &Arc<Self>, epoch: u64) {
        let pending = {
            let mut inner = self.inner.lock().expect("state mutex poisoned");
            if inner.epoch != epoch || inner.state == ConnectionState::Closed {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            std::mem::take(&mut inner.pending_ops)
        };
        let err = self.shape_error(BkError::ServerUnavailable);
        for op in pending {
            op(PendingOpOutcome::Failed(err));
        }
    }

    async fn start_auth(self: &Arc<Self>, epoch: u64) {
        let mut provider = self.auth_factory.new_provider(&self.addr);
        let mut outgoing = Vec::new();
        let init_result = {
            let mut send = |payload: Bytes| outgoing.push(payload);
            provider.init(&mut send)
        };
        for payload in outgoing.drain(..) {
            let plugin_name = provider.plugin_name().to_string();
            if self.write_raw(encode_auth(&plugin_name, &payload)).await.is_err() {
                self.handle_disconnect().await;
                return;
            }
        }

        match init_result {
            Some(result) => self.conclude_auth(epoch, result).await,
            None => {
                let mut slot = self.auth.lock().await;
                slot.provider = Some(provider);
                slot.started_at = Some(Instant::now());
            },
        }
    }

    async fn conclude_auth(self: &Arc<Self>, epoch: u64, result: Result<(), BkError>) {
        match result {
            Ok(()) => {
                let pending = {
                    let mut inner = self.inner.lock().expect("state mutex poisoned");
                    if inner.epoch != epoch || inner.state == ConnectionState::Closed {
                        return;
                    }
                    inner.state = ConnectionState::Connected;
                    std::mem::take(&mut inner.pending_ops)
                };
                for op in pending {
                    op(PendingOpOutcome::Ok);
                }
            },
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "auth handshake failed");
                // Check staleness before touching the transport: a resolution
                // racing against a newer epoch (or arriving after `close()`)
                // must never tear down a connection it no longer owns.
                let pending = {
                    let mut inner = self.inner.lock().expect("state mutex poisoned");
                    if inner.epoch != epoch || inner.state == ConnectionState::Closed {
                        return;
                    }
                    inner.state = ConnectionState::Disconnected;
                    std::mem::take(&mut inner.pending_ops)
                };
                self.teardown_transport().await;
                let e = self.shape_error(e);
                for op in pending {
                    op(PendingOpOutcome::Failed(e));
                }
            },
        }
    }

    async fn write_raw(&self, frame: Bytes) -> std::io::Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(w) = guard.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no active writer",
            ));
        };
        w.write_all(&frame).await
    }

    async fn read_loop(self: Arc<Self>, r: OwnedReadHalf, cancel: CancellationToken) {
        let mut framed = FramedRead::new(r, FrameCodec::new(self.cfg.max_frame_length));
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                item = framed.next() => item,
            };
            match next {
                Some(Ok(frame)) => {
                    if frame.header.opcode == Opcode::Auth {
                        self.on_auth_frame(frame.body).await;
                        continue;
                    }
                    self.on_response_frame(frame.header.opcode, frame.body);
                },
                Some(Err(e)) => {
                    warn!(addr = %self.addr, error = %e, "frame decode error; disconnecting");
                    break;
                },
                None => {
                    debug!(addr = %self.addr, "peer closed connection");
                    break;
                },
            }
        }
        self.handle_disconnect().await;
    }

    async fn on_auth_frame(self: &Arc<Self>, body: Bytes) {
        let (plugin_name, payload) = match parse_auth_payload(body) {
            Ok(v) => v,
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "malformed AUTH frame");
                return;
            },
        };

        let mut slot = self.auth.lock().await;
        let Some(provider) = slot.provider.as_mut() else {
            debug!(addr = %self.addr, "AUTH frame received with no in-flight handshake; ignoring");
            return;
        };
        if plugin_name != provider.plugin_name() {
            let expected = provider.plugin_name().to_string();
            drop(slot);
            warn!(addr = %self.addr, expected, got = %plugin_name, "auth plugin name mismatch");
            let epoch = self.current_epoch();
            self.conclude_auth(epoch, Err(BkError::Unauthorized)).await;
            return;
        }

        let mut outgoing = Vec::new();
        let result = {
            let mut send = |p: Bytes| outgoing.push(p);
            provider.process(payload, &mut send)
        };
        let plugin_name = provider.plugin_name().to_string();
        drop(slot);

        for p in outgoing {
            if self.write_raw(encode_auth(&plugin_name, &p)).await.is_err() {
                self.handle_disconnect().await;
                return;
            }
        }

        if let Some(result) = result {
            let epoch = self.current_epoch();
            self.conclude_auth(epoch, result).await;
        }
    }

    fn current_epoch(&self) -> u64 {
        self.inner.lock().expect("state mutex poisoned").epoch
    }

    fn on_response_frame(self: &Arc<Self>, opcode: Opcode, body: Bytes) {
        let parsed = match parse_op_response(body) {
            Ok(r) => r,
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "malformed response frame");
                return;
            },
        };
        let this = self.clone();
        let ledger = parsed.ledger;
        if let Err(e) = self.executor.submit_ordered(ledger, move || match opcode {
            Opcode::AddEntry => this.deliver_add_response(parsed),
            Opcode::ReadEntry => this.deliver_read_response(parsed),
            other => {
                warn!(opcode = ?other, "response frame for a non-response opcode; ignoring");
            },
        }) {
            error!(addr = %self.addr, error = %e, "failed to submit response to ordered executor");
        }
    }

    /// Reports one resolved completion's age to the stats sink, named by
    /// its kind (`"add"`/`"read"`) as the `record_success`/`record_failure`
    /// stream convention.
    fn record_latency(&self, kind: OpKind, submitted_at: Instant, ok: bool) {
        let op = match kind {
            OpKind::Add => "add",
            OpKind::Read => "read",
        };
        let latency_ms = submitted_at.elapsed().as_secs_f64() * 1_000.0;
        if ok {
            self.stats.record_success(op, latency_ms);
        } else {
            self.stats.record_failure(op, latency_ms);
        }
    }

    fn deliver_add_response(&self, resp: crate::wire::response::OpResponse) {
        let Some(c) = self.registry.take_add(RequestKey::new(resp.ledger, resp.entry)) else {
            debug!(ledger = resp.ledger, entry = resp.entry, "no pending add completion for response (already timed out)");
            return;
        };
        let submitted_at = c.submitted_at;
        match BkError::from_add_status(resp.status) {
            Ok(()) => {
                self.record_latency(OpKind::Add, submitted_at, true);
                c.complete_add(resp.ledger, resp.entry, self.addr.clone())
            },
            Err(e) => {
                self.record_latency(OpKind::Add, submitted_at, false);
                c.fail(self.shape_error(e), resp.ledger, resp.entry, self.addr.clone())
            },
        }
    }

    fn deliver_read_response(&self, resp: crate::wire::response::OpResponse) {
        let Some(c) = self.registry.take_read_with_lac_fallback(resp.ledger, resp.entry) else {
            debug!(ledger = resp.ledger, entry = resp.entry, "no pending read completion for response (already timed out)");
            return;
        };
        let submitted_at = c.submitted_at;
        match BkError::from_read_status(resp.status) {
            Ok(()) => {
                self.record_latency(OpKind::Read, submitted_at, true);
                c.complete_read(resp.ledger, resp.entry, self.addr.clone(), resp.body)
            },
            Err(e) => {
                self.record_latency(OpKind::Read, submitted_at, false);
                c.fail(self.shape_error(e), resp.ledger, resp.entry, self.addr.clone())
            },
        }
    }

    /// Called when the read loop observes EOF, a decode error, or a write
    /// fails: tears down the transport and returns the connection to
    /// `DISCONNECTED`, draining every live completion with
    /// `ServerUnavailable`.
    async fn handle_disconnect(self: &Arc<Self>) {
        self.teardown_transport().await;
        let pending = {
            let mut inner = self.inner.lock().expect("state mutex poisoned");
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            std::mem::take(&mut inner.pending_ops)
        };
        let err = self.shape_error(BkError::ServerUnavailable);
        for op in pending {
            op(PendingOpOutcome::Failed(err));
        }
        self.drain_completions(BkError::ServerUnavailable);
    }

    async fn teardown_transport(&self) {
        self.cancel.lock().expect("cancel mutex poisoned").cancel();
        if let Some(mut w) = self.writer.lock().await.take() {
            let _ = w.shutdown().await;
        }
        let mut slot = self.auth.lock().await;
        slot.provider = None;
        slot.started_at = None;
    }

    fn drain_completions(&self, err: BkError) {
        let err = self.shape_error(err);
        let addr = self.addr.clone();
        for (key, c) in self.registry.drain_all(OpKind::Add) {
            self.record_latency(OpKind::Add, c.submitted_at, false);
            c.fail(err, key.ledger, key.entry, addr.clone());
        }
        for (key, c) in self.registry.drain_all(OpKind::Read) {
            self.record_latency(OpKind::Read, c.submitted_at, false);
            c.fail(err, key.ledger, key.entry, addr.clone());
        }
    }

    /// Periodic maintenance invoked by the facade's shared timer: checks the
    /// auth handshake hasn't overrun `auth_timeout`, then sweeps both
    /// completion tables for entries past their deadline. Tolerant of being
    /// called from any state.
    pub async fn on_timer_tick(self: &Arc<Self>, now: Instant) {
        let auth_timed_out = {
            let slot = self.auth.lock().await;
            slot.started_at
                .is_some_and(|start| now.duration_since(start) >= self.cfg.auth_timeout)
        };
        if auth_timed_out {
            let epoch = self.current_epoch();
            warn!(addr = %self.addr, "auth handshake timed out");
            self.conclude_auth(epoch, Err(BkError::AuthTimeout)).await;
        }

        let expired = self.registry.drain_expired(now);
        if expired.is_empty() {
            return;
        }
        let addr = self.addr.clone();
        // Request-level timeouts resolve as `ServerUnavailable` — there is
        // no distinct timeout code for this path (only `AuthTimeout` for
        // the handshake), so this reuses the "try elsewhere" code rather
        // than inventing a new variant.
        let err = self.shape_error(BkError::ServerUnavailable);
        for (key, c, kind) in expired {
            self.record_latency(kind, c.submitted_at, false);
            c.fail(err, key.ledger, key.entry, addr.clone());
        }
    }

    pub fn add_entry(
        self: &Arc<Self>,
        ledger: LedgerId,
        entry: EntryId,
        master_key: [u8; MASTER_KEY_LEN],
        payload: Bytes,
        ctx: CallbackCtx,
        cb: WriteCallback,
    ) {
        let this = self.clone();
        let op: PendingOp = Box::new(move |outcome| match outcome {
            PendingOpOutcome::Ok => {
                this.dispatch_add_entry(ledger, entry, master_key, payload, ctx, cb)
            },
            PendingOpOutcome::Failed(err) => cb(Err(err), ledger, entry, this.addr.clone(), ctx),
        });
        self.enqueue_or_dispatch(op);
    }

    fn dispatch_add_entry(
        self: &Arc<Self>,
        ledger: LedgerId,
        entry: EntryId,
        master_key: [u8; MASTER_KEY_LEN],
        payload: Bytes,
        ctx: CallbackCtx,
        cb: WriteCallback,
    ) {
        let key = RequestKey::new(ledger, entry);
        self.registry
            .register_add(key, Completion::new_add(self.cfg.read_timeout, ctx, cb));
        let frame = encode_add_entry(ledger, entry, &master_key, &payload, crate::wire::header::Flags::NONE);
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.write_raw(frame).await {
                warn!(ledger, entry, error = %e, "add_entry write failed");
                if let Some(c) = this.registry.take_add(key) {
                    this.record_latency(OpKind::Add, c.submitted_at, false);
                    c.fail(this.shape_error(BkError::ServerUnavailable), ledger, entry, this.addr.clone());
                }
                this.handle_disconnect().await;
            }
        });
    }

    pub fn read_entry(
        self: &Arc<Self>,
        ledger: LedgerId,
        entry: EntryId,
        ctx: CallbackCtx,
        cb: ReadCallback,
    ) {
        self.read_entry_inner(ledger, entry, None, ctx, cb);
    }

    pub fn read_entry_and_fence(
        self: &Arc<Self>,
        ledger: LedgerId,
        entry: EntryId,
        master_key: [u8; MASTER_KEY_LEN],
        ctx: CallbackCtx,
        cb: ReadCallback,
    ) {
        self.read_entry_inner(ledger, entry, Some(master_key), ctx, cb);
    }

    fn read_entry_inner(
        self: &Arc<Self>,
        ledger: LedgerId,
        entry: EntryId,
        master_key: Option<[u8; MASTER_KEY_LEN]>,
        ctx: CallbackCtx,
        cb: ReadCallback,
    ) {
        let this = self.clone();
        let op: PendingOp = Box::new(move |outcome| match outcome {
            PendingOpOutcome::Ok => {
                this.dispatch_read_entry(ledger, entry, master_key, ctx, cb)
            },
            PendingOpOutcome::Failed(err) => cb(Err(err), ledger, entry, this.addr.clone(), ctx),
        });
        self.enqueue_or_dispatch(op);
    }

    fn dispatch_read_entry(
        self: &Arc<Self>,
        ledger: LedgerId,
        entry: EntryId,
        master_key: Option<[u8; MASTER_KEY_LEN]>,
        ctx: CallbackCtx,
        cb: ReadCallback,
    ) {
        let key = RequestKey::new(ledger, entry);
        self.registry
            .register_read(key, Completion::new_read(self.cfg.read_timeout, ctx, cb));
        let frame = match master_key {
            Some(mk) => encode_read_entry_and_fence(ledger, entry, &mk),
            None => encode_read_entry(ledger, entry),
        };
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.write_raw(frame).await {
                warn!(ledger, entry, error = %e, "read_entry write failed");
                if let Some(c) = this.registry.take_read(key) {
                    this.record_latency(OpKind::Read, c.submitted_at, false);
                    c.fail(this.shape_error(BkError::ServerUnavailable), ledger, entry, this.addr.clone());
                }
                this.handle_disconnect().await;
            }
        });
    }

    /// TRIM is fire-and-forget: the server never replies, so there is no
    /// completion to register.
    pub fn trim(self: &Arc<Self>, ledger: LedgerId, last_entry: EntryId) {
        let this = self.clone();
        let op: PendingOp = Box::new(move |outcome| {
            if let PendingOpOutcome::Failed(err) = outcome {
                debug!(ledger, last_entry, %err, "trim dropped: connection unavailable");
                return;
            }
            tokio::spawn(async move {
                if let Err(e) = this.write_raw(encode_trim(ledger, last_entry)).await {
                    warn!(ledger, last_entry, error = %e, "trim write failed");
                    this.handle_disconnect().await;
                }
            });
        });
        self.enqueue_or_dispatch(op);
    }

    /// Tears down the transport and returns to `DISCONNECTED`; the PCC is
    /// reusable afterward.
    pub async fn disconnect(self: &Arc<Self>) {
        self.teardown_transport().await;
        let pending = {
            let mut inner = self.inner.lock().expect("state mutex poisoned");
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            std::mem::take(&mut inner.pending_ops)
        };
        let err = self.shape_error(BkError::ServerUnavailable);
        for op in pending {
            op(PendingOpOutcome::Failed(err));
        }
        self.drain_completions(BkError::ServerUnavailable);
    }

    /// Permanently shuts the PCC down: terminal `CLOSED` state, every live
    /// completion and pending op resolved with `ClientClosed`.
    pub async fn close(self: &Arc<Self>) {
        self.teardown_transport().await;
        let pending = {
            let mut inner = self.inner.lock().expect("state mutex poisoned");
            inner.state = ConnectionState::Closed;
            std::mem::take(&mut inner.pending_ops)
        };
        let err = self.shape_error(BkError::ClientClosed);
        for op in pending {
            op(PendingOpOutcome::Failed(err));
        }
        self.drain_completions(BkError::ClientClosed);
    }
}
