// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario "sentinel fallback": a read submitted against the
//! `LAST_ADD_CONFIRMED` sentinel entry id is matched to a response carrying
//! the concrete entry id the server resolved it to.

use std::sync::{Arc, Mutex};

use bk_client_core::{
    auth::NoneAuthProviderFactory, client::ClientFacade, config::ClientConfig, error::BkError,
    model::{ServerAddress, LAST_ADD_CONFIRMED},
};
use bytes::Bytes;
use tokio::net::TcpListener;

use crate::common::{read_request_frame, wait_for, write_op_response, EOK, OP_READ_ENTRY};

#[tokio::test]
async fn sentinel_read_matches_concrete_entry_in_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        let req = read_request_frame(&mut sock).await;
        assert_eq!(req.opcode, OP_READ_ENTRY);
        let ledger = u64::from_be_bytes(req.body[0..8].try_into().unwrap());
        let entry = u64::from_be_bytes(req.body[8..16].try_into().unwrap());
        assert_eq!(ledger, 5);
        assert_eq!(entry, LAST_ADD_CONFIRMED);

        // The server resolves the sentinel to a concrete entry id and
        // reports it in the response.
        write_op_response(&mut sock, OP_READ_ENTRY, EOK, 5, 42, b"last").await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    });

    let facade = ClientFacade::new(ClientConfig::default(), Arc::new(NoneAuthProviderFactory));
    let addr = ServerAddress::new("127.0.0.1", port);

    let got: Arc<Mutex<Option<(Result<Bytes, BkError>, u64, u64)>>> = Arc::new(Mutex::new(None));
    let got2 = got.clone();
    facade.read_entry(
        addr,
        5,
        LAST_ADD_CONFIRMED,
        Arc::new(()),
        Box::new(move |res, ledger, entry, _addr, _ctx| {
            *got2.lock().unwrap() = Some((res, ledger, entry));
        }),
    );

    let (res, ledger, entry) = wait_for(|| got.lock().unwrap().clone(), 100).await;
    assert_eq!(res.unwrap(), &b"last"[..]);
    assert_eq!(ledger, 5);
    assert_eq!(entry, 42);

    facade.close().await;
}
