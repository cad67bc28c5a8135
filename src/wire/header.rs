// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The 32-bit packet header packed into every frame: `{version: u8, opcode:
//! u8, flags: u16}`, most-significant byte first.

use core::fmt;

use bitflags::bitflags;
use thiserror::Error;
use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, U16};

use crate::wire::PROTOCOL_VERSION;

/// Operation codes this core emits or parses.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Opcode {
    #[default]
    AddEntry = 1,
    ReadEntry = 2,
    Auth = 3,
    Trim = 4,
}

impl Opcode {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::AddEntry,
            2 => Self::ReadEntry,
            3 => Self::Auth,
            4 => Self::Trim,
            _ => return None,
        })
    }
}

/// Returned when a header's opcode byte doesn't name a known operation.
#[derive(Debug, Error)]
#[error("unknown opcode: 0x{0:02x}")]
pub struct UnknownOpcode(pub u8);

bitflags! {
    /// Per-request flag bits. `DO_FENCING` marks a read that must also mark
    /// the ledger fenced on the server.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u16 {
        const NONE = 0;
        const DO_FENCING = 0b0000_0001;
    }
}

/// Typed view over the 32-bit packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub opcode: Opcode,
    pub flags: Flags,
}

impl PacketHeader {
    pub fn new(opcode: Opcode, flags: Flags) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode,
            flags,
        }
    }

    pub fn to_raw(self) -> RawPacketHeader {
        RawPacketHeader {
            version: self.version,
            opcode: self.opcode as u8,
            flags: U16::new(self.flags.bits()),
        }
    }

    pub fn from_raw(raw: &RawPacketHeader) -> Result<Self, UnknownOpcode> {
        let opcode = Opcode::from_u8(raw.opcode).ok_or(UnknownOpcode(raw.opcode))?;
        Ok(Self {
            version: raw.version,
            opcode,
            flags: Flags::from_bits_truncate(raw.flags.get()),
        })
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.to_raw().as_bytes().try_into().expect("4 bytes")
    }

    pub fn from_bytes(buf: &[u8; 4]) -> Result<Self, UnknownOpcode> {
        let raw = RawPacketHeader::read_from_bytes(buf.as_slice())
            .expect("exact 4-byte slice always parses");
        Self::from_raw(&raw)
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PacketHeader{{version={}, opcode={:?}, flags={:?}}}",
            self.version, self.opcode, self.flags
        )
    }
}

/// Wire-safe, zero-copy representation of the 4-byte packet header.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawPacketHeader {
    pub version: u8,
    pub opcode: u8,
    pub flags: U16<BigEndian>,
}
