// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! User-visible error taxonomy for the client-side networking core.
//!
//! Every submitted op resolves through its callback exactly once, with
//! either `Ok(..)` or one of these codes. Transient conditions (disconnect,
//! timeout) are never transparently retried here — they are surfaced and
//! the caller's higher layer decides.

use thiserror::Error;

use crate::wire::status::StatusCode;

/// User-facing result code delivered to `WriteCallback`/`ReadCallback`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BkError {
    /// No pool/channel for the target server, a write failed, or the peer
    /// disconnected before a completion arrived.
    #[error("server unavailable")]
    ServerUnavailable,

    /// The facade has been permanently closed.
    #[error("client closed")]
    ClientClosed,

    /// Submission to the ordered executor was rejected.
    #[error("interrupted")]
    Interrupted,

    /// Server reported `EBADVERSION`.
    #[error("protocol version mismatch")]
    ProtocolVersion,

    /// Server reported `EFENCED` on an add.
    #[error("ledger fenced")]
    LedgerFenced,

    /// Server reported `EUA`, or the auth plugin name mismatched, or auth
    /// failed with no more specific code.
    #[error("unauthorized")]
    Unauthorized,

    /// Server reported `EREADONLY` on an add.
    #[error("read-only ledger")]
    ReadOnly,

    /// Server reported `ENOENTRY` or `ENOLEDGER` on a read.
    #[error("no such entry")]
    NoSuchEntry,

    /// Server reported `ETRIMMED` on a read.
    #[error("entry trimmed")]
    EntryTrimmed,

    /// Auth did not complete within the configured window.
    #[error("auth timeout")]
    AuthTimeout,

    /// Server returned an unrecognized non-OK status on an add.
    #[error("write failure")]
    WriteFailure,

    /// Server returned an unrecognized non-OK status on a read.
    #[error("read failure")]
    ReadFailure,
}

impl BkError {
    /// Maps a wire-level add-response status to the user taxonomy. `Ok(())`
    /// means the wire status was `EOK`.
    pub fn from_add_status(status: StatusCode) -> Result<(), BkError> {
        match status {
            StatusCode::Ok => Ok(()),
            StatusCode::BadVersion => Err(BkError::ProtocolVersion),
            StatusCode::Fenced => Err(BkError::LedgerFenced),
            StatusCode::Unauthorized => Err(BkError::Unauthorized),
            StatusCode::ReadOnly => Err(BkError::ReadOnly),
            _ => Err(BkError::WriteFailure),
        }
    }

    /// Maps a wire-level read-response status to the user taxonomy.
    pub fn from_read_status(status: StatusCode) -> Result<(), BkError> {
        match status {
            StatusCode::Ok => Ok(()),
            StatusCode::BadVersion => Err(BkError::ProtocolVersion),
            StatusCode::Unauthorized => Err(BkError::Unauthorized),
            StatusCode::NoEntry | StatusCode::NoLedger => Err(BkError::NoSuchEntry),
            StatusCode::Trimmed => Err(BkError::EntryTrimmed),
            _ => Err(BkError::ReadFailure),
        }
    }
}

