// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario "auth failure": an auth provider that fails during
//! `init` drives the callback to `Unauthorized` and the connection back to
//! `DISCONNECTED`.

use std::sync::Arc;

use bk_client_core::{
    auth::{AuthProvider, AuthProviderFactory, AuthSendCallback},
    client::ClientFacade,
    config::ClientConfig,
    error::BkError,
    model::ServerAddress,
};
use bytes::Bytes;
use tokio::net::TcpListener;

use crate::common::wait_for;

struct AlwaysFailsProvider;

impl AuthProvider for AlwaysFailsProvider {
    fn plugin_name(&self) -> &str {
        "always-fails"
    }

    fn init(&mut self, _send: AuthSendCallback<'_>) -> Option<Result<(), BkError>> {
        Some(Err(BkError::Unauthorized))
    }

    fn process(
        &mut self,
        _incoming: Bytes,
        _send: AuthSendCallback<'_>,
    ) -> Option<Result<(), BkError>> {
        Some(Err(BkError::Unauthorized))
    }
}

struct AlwaysFailsFactory;

impl AuthProviderFactory for AlwaysFailsFactory {
    fn plugin_name(&self) -> &str {
        "always-fails"
    }

    fn new_provider(&self, _addr: &ServerAddress) -> Box<dyn AuthProvider> {
        Box::new(AlwaysFailsProvider)
    }
}

#[tokio::test]
async fn auth_init_failure_yields_unauthorized() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Accept and hold the connection open; AlwaysFailsProvider concludes
    // without any wire exchange so the fake server never needs to read or
    // write anything.
    tokio::spawn(async move {
        let (_sock, _) = listener.accept().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let facade = ClientFacade::new(ClientConfig::default(), Arc::new(AlwaysFailsFactory));
    let addr = ServerAddress::new("127.0.0.1", port);

    let result = Arc::new(std::sync::Mutex::new(None));
    let result2 = result.clone();
    facade.read_entry(
        addr,
        1,
        1,
        Arc::new(()),
        Box::new(move |res, _l, _e, _a, _c| *result2.lock().unwrap() = Some(res)),
    );

    let got = wait_for(|| result.lock().unwrap().clone(), 100).await;
    assert_eq!(got, Err(BkError::Unauthorized));

    facade.close().await;
}
