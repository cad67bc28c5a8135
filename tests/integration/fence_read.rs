// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario "fence read": after an `EOK` add at (5,7), a
//! `read_entry_and_fence` returns the payload; a later add to a fenced
//! ledger maps the server's `EFENCED` status to `LedgerFenced`.

use std::sync::{Arc, Mutex};

use bk_client_core::{
    auth::NoneAuthProviderFactory, client::ClientFacade, config::ClientConfig, error::BkError,
    model::ServerAddress, wire::MASTER_KEY_LEN,
};
use bytes::Bytes;
use tokio::net::TcpListener;

use crate::common::{
    read_request_frame, wait_for, write_op_response, EFENCED, EOK, OP_ADD_ENTRY, OP_READ_ENTRY,
};

#[tokio::test]
async fn fenced_add_maps_to_ledger_fenced() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        let add = read_request_frame(&mut sock).await;
        assert_eq!(add.opcode, OP_ADD_ENTRY);
        write_op_response(&mut sock, OP_ADD_ENTRY, EOK, 5, 7, &[]).await;

        let fence_read = read_request_frame(&mut sock).await;
        assert_eq!(fence_read.opcode, OP_READ_ENTRY);
        assert_ne!(fence_read.flags, 0, "FLAG_DO_FENCING must be set");
        write_op_response(&mut sock, OP_READ_ENTRY, EOK, 5, 7, b"hi").await;

        let second_add = read_request_frame(&mut sock).await;
        assert_eq!(second_add.opcode, OP_ADD_ENTRY);
        write_op_response(&mut sock, OP_ADD_ENTRY, EFENCED, 5, 8, &[]).await;

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    });

    let facade = ClientFacade::new(ClientConfig::default(), Arc::new(NoneAuthProviderFactory));
    let addr = ServerAddress::new("127.0.0.1", port);

    let add_result: Arc<Mutex<Option<Result<(), BkError>>>> = Arc::new(Mutex::new(None));
    let add_result2 = add_result.clone();
    facade.add_entry(
        addr.clone(),
        5,
        7,
        [0u8; MASTER_KEY_LEN],
        Bytes::from_static(b"hi"),
        Arc::new(()),
        Box::new(move |res, _l, _e, _a, _c| *add_result2.lock().unwrap() = Some(res)),
    );
    let got = wait_for(|| add_result.lock().unwrap().clone(), 100).await;
    assert_eq!(got, Ok(()));

    let read_result: Arc<Mutex<Option<Result<Bytes, BkError>>>> = Arc::new(Mutex::new(None));
    let read_result2 = read_result.clone();
    facade.read_entry_and_fence(
        addr.clone(),
        5,
        7,
        [0u8; MASTER_KEY_LEN],
        Arc::new(()),
        Box::new(move |res, _l, _e, _a, _c| *read_result2.lock().unwrap() = Some(res)),
    );
    let got = wait_for(|| read_result.lock().unwrap().clone(), 100).await;
    assert_eq!(got.unwrap(), &b"hi"[..]);

    let second_add_result: Arc<Mutex<Option<Result<(), BkError>>>> = Arc::new(Mutex::new(None));
    let second_add_result2 = second_add_result.clone();
    facade.add_entry(
        addr,
        5,
        8,
        [0u8; MASTER_KEY_LEN],
        Bytes::from_static(b"bye"),
        Arc::new(()),
        Box::new(move |res, _l, _e, _a, _c| *second_add_result2.lock().unwrap() = Some(res)),
    );
    let got = wait_for(|| second_add_result.lock().unwrap().clone(), 100).await;
    assert_eq!(got, Err(BkError::LedgerFenced));

    facade.close().await;
}
