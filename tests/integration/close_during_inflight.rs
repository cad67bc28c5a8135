// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario "close during inflight": 100 adds are submitted
//! against a server that never answers; `close()` resolves every one of
//! them with `ClientClosed` exactly once, and none fire afterward.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use bk_client_core::{
    auth::NoneAuthProviderFactory, client::ClientFacade, config::ClientConfig, error::BkError,
    model::ServerAddress, wire::MASTER_KEY_LEN,
};
use bytes::Bytes;
use tokio::net::TcpListener;

#[tokio::test]
async fn close_resolves_every_inflight_op_exactly_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        // Accept and never read/respond; connections just sit open until
        // the facade tears them down.
        while let Ok((sock, _)) = listener.accept().await {
            std::mem::forget(sock);
        }
    });

    let facade = ClientFacade::new(ClientConfig::default(), Arc::new(NoneAuthProviderFactory));
    let addr = ServerAddress::new("127.0.0.1", port);

    let fire_count = Arc::new(AtomicUsize::new(0));
    let ok_count = Arc::new(AtomicUsize::new(0));
    let closed_count = Arc::new(AtomicUsize::new(0));

    for i in 0..100u64 {
        let fire_count = fire_count.clone();
        let ok_count = ok_count.clone();
        let closed_count = closed_count.clone();
        facade.add_entry(
            addr.clone(),
            1,
            i,
            [0u8; MASTER_KEY_LEN],
            Bytes::from_static(b"x"),
            Arc::new(()),
            Box::new(move |res, _l, _e, _a, _c| {
                fire_count.fetch_add(1, Ordering::SeqCst);
                match res {
                    Ok(()) => {
                        ok_count.fetch_add(1, Ordering::SeqCst);
                    },
                    Err(BkError::ClientClosed) => {
                        closed_count.fetch_add(1, Ordering::SeqCst);
                    },
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }),
        );
    }

    facade.close().await;

    assert_eq!(fire_count.load(Ordering::SeqCst), 100);
    assert_eq!(
        ok_count.load(Ordering::SeqCst) + closed_count.load(Ordering::SeqCst),
        100
    );

    // No further callbacks fire after close() has returned.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(fire_count.load(Ordering::SeqCst), 100);
}
