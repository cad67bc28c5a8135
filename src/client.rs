// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The client-facing facade: owns one `PerServerPool` per server, a shared
//! `OrderedExecutor`, and the periodic timer that drives every live
//! connection's timeout scan.

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    auth::AuthProviderFactory,
    config::ClientConfig,
    error::BkError,
    model::{CallbackCtx, EntryId, LedgerId, ReadCallback, ServerAddress, WriteCallback},
    ordered_executor::OrderedExecutor,
    pool::PerServerPool,
    stats::{SharedStatsSink, noop_stats},
    wire::MASTER_KEY_LEN,
};

pub struct ClientFacade {
    cfg: Arc<ClientConfig>,
    auth_factory: Arc<dyn AuthProviderFactory>,
    executor: Arc<OrderedExecutor>,
    stats: SharedStatsSink,
    pools: DashMap<ServerAddress, Arc<PerServerPool>>,
    /// Shared with every `PerConnectionClient` so a connection can rewrite
    /// its own failures to `ClientClosed` once the facade is torn down,
    /// without each lookup taking the facade's lock.
    closed: Arc<AtomicBool>,
    scan_cancel: CancellationToken,
}

impl ClientFacade {
    /// Builds a facade and starts its background timeout-scan task. Pools
    /// and connections are created lazily on first use per server.
    pub fn new(cfg: ClientConfig, auth_factory: Arc<dyn AuthProviderFactory>) -> Arc<Self> {
        Self::with_stats(cfg, auth_factory, noop_stats())
    }

    pub fn with_stats(
        cfg: ClientConfig,
        auth_factory: Arc<dyn AuthProviderFactory>,
        stats: SharedStatsSink,
    ) -> Arc<Self> {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let executor = Arc::new(OrderedExecutor::new(
            NonZeroUsize::new(worker_count).expect("available_parallelism is never 0"),
        ));
        let facade = Arc::new(Self {
            cfg: Arc::new(cfg),
            auth_factory,
            executor,
            stats,
            pools: DashMap::new(),
            closed: Arc::new(AtomicBool::new(false)),
            scan_cancel: CancellationToken::new(),
        });
        facade.clone().spawn_scan_task();
        facade
    }

    fn spawn_scan_task(self: Arc<Self>) {
        let period = self.cfg.scan_period();
        let cancel = self.scan_cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => self.run_timeout_scan().await,
                }
            }
        });
    }

    async fn run_timeout_scan(&self) {
        let now = Instant::now();
        // Snapshot the pools before awaiting so no DashMap shard guard is
        // held across an `.await` (same discipline as the registry's
        // collect-then-act scans).
        let pools: Vec<Arc<PerServerPool>> = self.pools.iter().map(|e| e.value().clone()).collect();
        for pool in pools {
            for conn in pool.connections() {
                conn.on_timer_tick(now).await;
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn pool_for(&self, addr: &ServerAddress) -> Arc<PerServerPool> {
        self.pools
            .entry(addr.clone())
            .or_insert_with(|| {
                Arc::new(PerServerPool::new(
                    addr.clone(),
                    self.cfg.clone(),
                    self.auth_factory.clone(),
                    self.executor.clone(),
                    self.stats.clone(),
                    self.closed.clone(),
                ))
            })
            .clone()
    }

    pub fn add_entry(
        self: &Arc<Self>,
        addr: ServerAddress,
        ledger: LedgerId,
        entry: EntryId,
        master_key: [u8; MASTER_KEY_LEN],
        payload: Bytes,
        ctx: CallbackCtx,
        cb: WriteCallback,
    ) {
        if self.is_closed() {
            cb(Err(BkError::ClientClosed), ledger, entry, addr, ctx);
            return;
        }
        let pool = self.pool_for(&addr);
        let conn = pool.obtain(ledger).clone();
        conn.add_entry(ledger, entry, master_key, payload, ctx, cb);
    }

    pub fn read_entry(
        self: &Arc<Self>,
        addr: ServerAddress,
        ledger: LedgerId,
        entry: EntryId,
        ctx: CallbackCtx,
        cb: ReadCallback,
    ) {
        if self.is_closed() {
            cb(Err(BkError::ClientClosed), ledger, entry, addr, ctx);
            return;
        }
        let pool = self.pool_for(&addr);
        let conn = pool.obtain(ledger).clone();
        conn.read_entry(ledger, entry, ctx, cb);
    }

    pub fn read_entry_and_fence(
        self: &Arc<Self>,
        addr: ServerAddress,
        ledger: LedgerId,
        entry: EntryId,
        master_key: [u8; MASTER_KEY_LEN],
        ctx: CallbackCtx,
        cb: ReadCallback,
    ) {
        if self.is_closed() {
            cb(Err(BkError::ClientClosed), ledger, entry, addr, ctx);
            return;
        }
        let pool = self.pool_for(&addr);
        let conn = pool.obtain(ledger).clone();
        conn.read_entry_and_fence(ledger, entry, master_key, ctx, cb);
    }

    /// Fire-and-forget; dropped silently if the facade is closed or the
    /// target connection is unavailable.
    pub fn trim(self: &Arc<Self>, addr: ServerAddress, ledger: LedgerId, last_entry: EntryId) {
        if self.is_closed() {
            return;
        }
        let pool = self.pool_for(&addr);
        let conn = pool.obtain(ledger).clone();
        conn.trim(ledger, last_entry);
    }

    /// Disconnects (but does not permanently close) every connection to one
    /// server; each reconnects lazily on its next dispatched op.
    pub async fn close_peers(&self, addr: &ServerAddress) {
        if let Some(pool) = self.pools.get(addr).map(|e| e.value().clone()) {
            pool.disconnect().await;
        }
    }

    /// Permanently shuts the facade down: stops the scan task and closes
    /// every pool, bounded by `cfg.close_wait` per pool so a stuck peer
    /// cannot hang shutdown indefinitely.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scan_cancel.cancel();

        let pools: Vec<Arc<PerServerPool>> = self.pools.iter().map(|e| e.value().clone()).collect();
        for pool in pools {
            if tokio::time::timeout(self.cfg.close_wait, pool.close())
                .await
                .is_err()
            {
                warn!(addr = %pool.address(), "pool close timed out; abandoning in-flight drain");
            }
        }
    }
}
