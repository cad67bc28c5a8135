// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario "happy add": a fresh facade submits one add; the
//! server answers `EOK` and the callback fires `(OK, ledger, entry, addr)`.

use std::sync::{Arc, Mutex};

use bk_client_core::{
    auth::NoneAuthProviderFactory, client::ClientFacade, config::ClientConfig, error::BkError,
    model::ServerAddress, wire::MASTER_KEY_LEN,
};
use bytes::Bytes;
use tokio::net::TcpListener;

use crate::common::{read_request_frame, wait_for, write_op_response, EOK, OP_ADD_ENTRY};

#[tokio::test]
async fn happy_add_round_trips() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let req = read_request_frame(&mut sock).await;
        assert_eq!(req.opcode, OP_ADD_ENTRY);
        assert_eq!(req.flags, 0);
        // ledger(8) entry(8) master_key(20) payload
        let ledger = u64::from_be_bytes(req.body[0..8].try_into().unwrap());
        let entry = u64::from_be_bytes(req.body[8..16].try_into().unwrap());
        assert_eq!(ledger, 5);
        assert_eq!(entry, 7);
        assert_eq!(&req.body[16 + MASTER_KEY_LEN..], b"hi");
        write_op_response(&mut sock, OP_ADD_ENTRY, EOK, ledger, entry, &[]).await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    });

    let facade = ClientFacade::new(ClientConfig::default(), Arc::new(NoneAuthProviderFactory));
    let addr = ServerAddress::new("127.0.0.1", port);

    let result: Arc<Mutex<Option<(Result<(), BkError>, u64, u64)>>> = Arc::new(Mutex::new(None));
    let result2 = result.clone();
    facade.add_entry(
        addr.clone(),
        5,
        7,
        [0u8; MASTER_KEY_LEN],
        Bytes::from_static(b"hi"),
        Arc::new(()),
        Box::new(move |res, ledger, entry, _addr, _ctx| {
            *result2.lock().unwrap() = Some((res, ledger, entry));
        }),
    );

    let (res, ledger, entry) =
        wait_for(|| result.lock().unwrap().clone(), 100).await;
    assert_eq!(res, Ok(()));
    assert_eq!((ledger, entry), (5, 7));

    facade.close().await;
}
