// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Length-delimited inbound frame decoder. Frames larger than the
//! configured maximum are corrupt; truncated frames simply await more
//! bytes (tokio_util's `Decoder` contract: `Ok(None)` means "need more").

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;

use crate::wire::header::{PacketHeader, UnknownOpcode};

/// One fully-received frame: the parsed 4-byte packet header plus the
/// remaining body bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: PacketHeader,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum FrameCodecError {
    #[error("frame length {0} exceeds max_frame_length {1}")]
    TooLarge(u32, u32),
    #[error("{0}")]
    UnknownOpcode(#[from] UnknownOpcode),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct FrameCodec {
    max_frame_length: u32,
}

impl FrameCodec {
    pub fn new(max_frame_length: u32) -> Self {
        Self { max_frame_length }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let total_len = u32::from_be_bytes(src[0..4].try_into().expect("4 bytes"));
        if total_len > self.max_frame_length {
            return Err(FrameCodecError::TooLarge(total_len, self.max_frame_length));
        }
        // total_len covers the packet header (4 bytes) plus the body.
        if total_len < 4 {
            return Err(FrameCodecError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "frame length shorter than packet header",
            )));
        }

        let needed = 4 + total_len as usize;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        let mut frame_buf = src.split_to(needed);
        frame_buf.advance(4); // drop the length prefix
        let mut hdr_bytes = [0u8; 4];
        hdr_bytes.copy_from_slice(&frame_buf[0..4]);
        frame_buf.advance(4);

        let header = PacketHeader::from_bytes(&hdr_bytes)?;
        let body = frame_buf.freeze();

        Ok(Some(Frame { header, body }))
    }
}
