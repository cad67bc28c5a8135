// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Response frame parsing. ADD/READ responses carry `status | ledger |
//! entry | body`; AUTH frames carry an opaque payload with no status field.

use bytes::{Buf, Bytes};
use thiserror::Error;

use crate::{
    model::{EntryId, LedgerId},
    wire::status::StatusCode,
};

/// Minimum length of the status/ledger/entry prefix on an ADD/READ response.
pub const RESPONSE_PREFIX_LEN: usize = 4 + 8 + 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseParseError {
    #[error("response body too short: got {0} bytes, need at least {RESPONSE_PREFIX_LEN}")]
    TooShort(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthParseError {
    #[error("auth frame too short for a plugin name length prefix")]
    MissingNameLen,
    #[error("auth frame declares a plugin name longer than the remaining body")]
    NameLenOverflow,
    #[error("auth frame plugin name is not valid utf-8")]
    InvalidNameUtf8,
}

/// Parsed ADD_ENTRY/READ_ENTRY response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpResponse {
    pub status: StatusCode,
    pub ledger: LedgerId,
    pub entry: EntryId,
    pub body: Bytes,
}

/// Parses the body of an ADD_ENTRY or READ_ENTRY response frame (the bytes
/// following the 4-byte packet header).
pub fn parse_op_response(mut body: Bytes) -> Result<OpResponse, ResponseParseError> {
    if body.len() < RESPONSE_PREFIX_LEN {
        return Err(ResponseParseError::TooShort(body.len()));
    }
    let status = StatusCode::from_wire(body.get_u32());
    let ledger = body.get_u64();
    let entry = body.get_u64();
    Ok(OpResponse {
        status,
        ledger,
        entry,
        body,
    })
}

/// Splits an AUTH frame body into the plugin name carried in the transport
/// envelope and the opaque payload handed verbatim to the `AuthProvider`.
pub fn parse_auth_payload(mut body: Bytes) -> Result<(String, Bytes), AuthParseError> {
    if body.len() < 2 {
        return Err(AuthParseError::MissingNameLen);
    }
    let name_len = body.get_u16() as usize;
    if body.len() < name_len {
        return Err(AuthParseError::NameLenOverflow);
    }
    let name_bytes = body.split_to(name_len);
    let plugin_name =
        String::from_utf8(name_bytes.to_vec()).map_err(|_| AuthParseError::InvalidNameUtf8)?;
    Ok((plugin_name, body))
}
