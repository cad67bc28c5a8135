// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pluggable authentication handshake. An `AuthProvider` shuttles opaque
//! payloads across the `AUTH` opcode; this layer only frames and routes
//! them.

use bytes::Bytes;

use crate::{error::BkError, model::ServerAddress};

/// Send-side callback an `AuthProvider` uses to emit a payload that this
/// layer frames with the `AUTH` opcode and writes to the wire.
pub type AuthSendCallback<'a> = &'a mut dyn FnMut(Bytes);

/// One auth session's plugin identity and message-exchange logic. A fresh
/// provider is obtained per connect attempt and lives for a single auth
/// session, owned exclusively by its PCC.
pub trait AuthProvider: Send {
    /// Plugin name advertised on the wire; must match the provider's own
    /// `Factory::plugin_name()` on every frame received back, or the
    /// handshake fails with `Unauthorized`.
    fn plugin_name(&self) -> &str;

    /// Called once after the connection succeeds connect but before any
    /// queued op is dispatched. May emit zero or more payloads via `send`.
    /// Returns `Some(result)` for providers that can conclude immediately
    /// (e.g. a bare token exchange); `None` if the handshake needs one or
    /// more round trips through [`AuthProvider::process`].
    fn init(&mut self, send: AuthSendCallback<'_>) -> Option<Result<(), BkError>>;

    /// Called for every inbound `AUTH` frame. May emit further payloads via
    /// `send`. Returns `Some(result)` once the handshake has concluded
    /// (`Ok(())` -> transition to CONNECTED, `Err(code)` -> close and drain
    /// pending ops with `code`); `None` means more exchange is needed.
    fn process(
        &mut self,
        incoming: Bytes,
        send: AuthSendCallback<'_>,
    ) -> Option<Result<(), BkError>>;
}

/// Builds a fresh `AuthProvider` per connect attempt.
pub trait AuthProviderFactory: Send + Sync {
    fn plugin_name(&self) -> &str;

    fn new_provider(&self, addr: &ServerAddress) -> Box<dyn AuthProvider>;
}

/// A provider that completes immediately with no wire exchange at all.
/// The default factory when no authentication is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneAuthProvider;

impl AuthProvider for NoneAuthProvider {
    fn plugin_name(&self) -> &str {
        "none"
    }

    fn init(&mut self, _send: AuthSendCallback<'_>) -> Option<Result<(), BkError>> {
        Some(Ok(()))
    }

    fn process(
        &mut self,
        _incoming: Bytes,
        _send: AuthSendCallback<'_>,
    ) -> Option<Result<(), BkError>> {
        // Nothing to negotiate; an inbound AUTH frame while using the none
        // provider is unexpected but treated as an immediate pass rather
        // than a protocol violation.
        Some(Ok(()))
    }
}

/// Factory for [`NoneAuthProvider`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneAuthProviderFactory;

impl AuthProviderFactory for NoneAuthProviderFactory {
    fn plugin_name(&self) -> &str {
        "none"
    }

    fn new_provider(&self, _addr: &ServerAddress) -> Box<dyn AuthProvider> {
        Box::new(NoneAuthProvider)
    }
}
