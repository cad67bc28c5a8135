// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Request frame encoders. Every frame is `u32 total_length_excluding_this_
//! field | u32 packet_header | body`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    model::{EntryId, LedgerId},
    wire::{
        MASTER_KEY_LEN,
        header::{Flags, Opcode, PacketHeader},
    },
};

fn frame(header: PacketHeader, body_len: usize, write_body: impl FnOnce(&mut BytesMut)) -> Bytes {
    let total_len = 4 + body_len; // packet_header + body, excludes the length prefix itself
    let mut buf = BytesMut::with_capacity(4 + total_len);
    buf.put_u32(total_len as u32);
    buf.put_slice(&header.to_bytes());
    write_body(&mut buf);
    debug_assert_eq!(buf.len(), 4 + total_len);
    buf.freeze()
}

/// Builds an ADD_ENTRY frame: `master_key[K] | payload`.
pub fn encode_add_entry(
    ledger: LedgerId,
    entry: EntryId,
    master_key: &[u8; MASTER_KEY_LEN],
    payload: &[u8],
    flags: Flags,
) -> Bytes {
    let header = PacketHeader::new(Opcode::AddEntry, flags);
    let body_len = 8 + 8 + MASTER_KEY_LEN + payload.len();
    frame(header, body_len, |buf| {
        buf.put_u64(ledger);
        buf.put_u64(entry);
        buf.put_slice(master_key);
        buf.put_slice(payload);
    })
}

/// Builds a plain READ_ENTRY frame: `ledger | entry`.
pub fn encode_read_entry(ledger: LedgerId, entry: EntryId) -> Bytes {
    let header = PacketHeader::new(Opcode::ReadEntry, Flags::NONE);
    frame(header, 16, |buf| {
        buf.put_u64(ledger);
        buf.put_u64(entry);
    })
}

/// Builds a fencing READ_ENTRY frame: `ledger | entry | master_key[K]`.
pub fn encode_read_entry_and_fence(
    ledger: LedgerId,
    entry: EntryId,
    master_key: &[u8; MASTER_KEY_LEN],
) -> Bytes {
    let header = PacketHeader::new(Opcode::ReadEntry, Flags::DO_FENCING);
    frame(header, 16 + MASTER_KEY_LEN, |buf| {
        buf.put_u64(ledger);
        buf.put_u64(entry);
        buf.put_slice(master_key);
    })
}

/// Builds a fire-and-forget TRIM frame: `ledger | last_entry`.
pub fn encode_trim(ledger: LedgerId, last_entry: EntryId) -> Bytes {
    let header = PacketHeader::new(Opcode::Trim, Flags::NONE);
    frame(header, 16, |buf| {
        buf.put_u64(ledger);
        buf.put_u64(last_entry);
    })
}

/// Builds an AUTH frame: `u16 plugin_name_len | plugin_name | opaque payload`.
/// The plugin name is this layer's transport envelope around the
/// provider-specific payload: the compatibility check reads it back off an
/// inbound frame without caring what the opaque bytes mean.
pub fn encode_auth(plugin_name: &str, payload: &[u8]) -> Bytes {
    let header = PacketHeader::new(Opcode::Auth, Flags::NONE);
    let name = plugin_name.as_bytes();
    frame(header, 2 + name.len() + payload.len(), |buf| {
        buf.put_u16(name.len() as u16);
        buf.put_slice(name);
        buf.put_slice(payload);
    })
}
