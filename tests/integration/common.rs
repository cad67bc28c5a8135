// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared fake-server helpers for the in-process integration tests: minimal
//! length-delimited frame read/write against a loopback `TcpStream`, mirroring
//! the wire format this crate emits/parses without depending on the crate's
//! own codec, so a bug in the codec can't mask itself in these tests.

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

pub const OP_ADD_ENTRY: u8 = 1;
pub const OP_READ_ENTRY: u8 = 2;
pub const OP_AUTH: u8 = 3;
#[allow(dead_code)]
pub const OP_TRIM: u8 = 4;

pub const PROTOCOL_VERSION: u8 = 3;

pub const EOK: u32 = 0;
#[allow(dead_code)]
pub const EFENCED: u32 = 2;
#[allow(dead_code)]
pub const EUA: u32 = 3;

/// One fully received request frame as seen by the fake server.
pub struct RequestFrame {
    pub opcode: u8,
    pub flags: u16,
    pub body: Vec<u8>,
}

/// Reads exactly one length-delimited frame off `sock` the way this crate's
/// own codec would produce it on the wire.
pub async fn read_request_frame(sock: &mut TcpStream) -> RequestFrame {
    let mut len_buf = [0u8; 4];
    sock.read_exact(&mut len_buf).await.expect("read length prefix");
    let total_len = u32::from_be_bytes(len_buf) as usize;
    let mut rest = vec![0u8; total_len];
    sock.read_exact(&mut rest).await.expect("read frame body");
    let opcode = rest[1];
    let flags = u16::from_be_bytes([rest[2], rest[3]]);
    RequestFrame {
        opcode,
        flags,
        body: rest[4..].to_vec(),
    }
}

/// Writes an ADD_ENTRY/READ_ENTRY-shaped response frame:
/// `len | header | status | ledger | entry | body`.
pub async fn write_op_response(
    sock: &mut TcpStream,
    opcode: u8,
    status: u32,
    ledger: u64,
    entry: u64,
    body: &[u8],
) {
    let mut resp = Vec::new();
    resp.extend_from_slice(&status.to_be_bytes());
    resp.extend_from_slice(&ledger.to_be_bytes());
    resp.extend_from_slice(&entry.to_be_bytes());
    resp.extend_from_slice(body);
    write_frame(sock, opcode, 0, &resp).await;
}

/// Writes an AUTH-shaped frame: `len | header | plugin_name_len | plugin_name
/// | payload`.
pub async fn write_auth_frame(sock: &mut TcpStream, plugin_name: &str, payload: &[u8]) {
    let mut body = Vec::new();
    let name = plugin_name.as_bytes();
    body.extend_from_slice(&(name.len() as u16).to_be_bytes());
    body.extend_from_slice(name);
    body.extend_from_slice(payload);
    write_frame(sock, OP_AUTH, 0, &body).await;
}

async fn write_frame(sock: &mut TcpStream, opcode: u8, flags: u16, body: &[u8]) {
    let mut out = Vec::new();
    let total_len = (4 + body.len()) as u32;
    out.extend_from_slice(&total_len.to_be_bytes());
    out.push(PROTOCOL_VERSION);
    out.push(opcode);
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(body);
    sock.write_all(&out).await.expect("write response frame");
}

/// Polls `f` until it returns `Some`, or panics after `attempts * 20ms`.
pub async fn wait_for<T>(mut f: impl FnMut() -> Option<T>, attempts: u32) -> T {
    for _ in 0..attempts {
        if let Some(v) = f() {
            return v;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("condition not met within {attempts} attempts");
}
