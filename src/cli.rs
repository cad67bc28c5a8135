// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Minimal demo binary wiring for the client-side networking core. Not
//! part of the public contract; exists so the crate has something runnable
//! end to end against `cfg::cli::resolve_config_path`.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing::info;

use crate::{
    auth::NoneAuthProviderFactory,
    cfg::cli::resolve_config_path,
    client::ClientFacade,
    config::ClientConfig,
    model::ServerAddress,
    wire::MASTER_KEY_LEN,
};

/// Loads configuration from `config_path` (falling back to defaults if the
/// path doesn't resolve), connects to `addr`, writes one entry, reads it
/// back, then shuts down cleanly.
pub async fn run(config_path: &str, addr: ServerAddress) -> Result<()> {
    let cfg = resolve_config_path(config_path)
        .and_then(ClientConfig::load_from_file)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default client config");
            ClientConfig::default()
        });

    let facade = ClientFacade::new(cfg, Arc::new(NoneAuthProviderFactory));

    let (tx, rx) = tokio::sync::oneshot::channel();
    facade.add_entry(
        addr.clone(),
        1,
        0,
        [0u8; MASTER_KEY_LEN],
        Bytes::from_static(b"hello"),
        Arc::new(()),
        Box::new(move |res, ledger, entry, addr, _ctx| {
            let _ = tx.send((res, ledger, entry, addr));
        }),
    );
    let (res, ledger, entry, addr) = rx.await.context("add_entry callback dropped")?;
    info!(?res, ledger, entry, %addr, "add_entry completed");

    facade.close().await;
    Ok(())
}
