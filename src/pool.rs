// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-server connection pool: a fixed-size array of `PerConnectionClient`s
//! to one server, selected by hashing a caller-chosen routing key so that
//! repeated requests for the same ledger land on the same connection.

use std::{
    hash::{Hash, Hasher},
    sync::{atomic::AtomicBool, Arc},
};

use crate::{
    auth::AuthProviderFactory, config::ClientConfig, connection::PerConnectionClient,
    model::ServerAddress, ordered_executor::OrderedExecutor, stats::SharedStatsSink,
};

pub struct PerServerPool {
    addr: ServerAddress,
    conns: Vec<Arc<PerConnectionClient>>,
}

impl PerServerPool {
    pub fn new(
        addr: ServerAddress,
        cfg: Arc<ClientConfig>,
        auth_factory: Arc<dyn AuthProviderFactory>,
        executor: Arc<OrderedExecutor>,
        stats: SharedStatsSink,
        facade_closed: Arc<AtomicBool>,
    ) -> Self {
        let conns = (0..cfg.connections_per_server)
            .map(|_| {
                PerConnectionClient::new(
                    addr.clone(),
                    cfg.clone(),
                    auth_factory.clone(),
                    executor.clone(),
                    stats.clone(),
                    facade_closed.clone(),
                )
            })
            .collect();
        Self { addr, conns }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.addr
    }

    /// Selects one of this pool's connections by hashing `routing_key`
    /// (typically the ledger id, so every request for a ledger sticks to one
    /// TCP connection).
    pub fn obtain(&self, routing_key: u64) -> &Arc<PerConnectionClient> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        routing_key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.conns.len();
        &self.conns[idx]
    }

    pub fn connections(&self) -> &[Arc<PerConnectionClient>] {
        &self.conns
    }

    /// Tears every connection down to `DISCONNECTED`; each is reusable
    /// afterward. Fans out across the pool's connections concurrently.
    pub async fn disconnect(&self) {
        let mut set = tokio::task::JoinSet::new();
        for c in self.conns.iter().cloned() {
            set.spawn(async move { c.disconnect().await });
        }
        while set.join_next().await.is_some() {}
    }

    /// Permanently closes every connection in the pool.
    pub async fn close(&self) {
        let mut set = tokio::task::JoinSet::new();
        for c in self.conns.iter().cloned() {
            set.spawn(async move { c.close().await });
        }
        while set.join_next().await.is_some() {}
    }
}
