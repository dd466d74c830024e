// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use crate::error::ProtocolError;

/// Identifies a valid frame start. Every message on the wire begins with
/// this constant.
pub const MAGIC: u64 = 0x87DE_5D02_E6AB_95C7;

/// Only header version this core understands.
pub const VERSION: u32 = 0;

/// The size in bytes of an encoded [`Header`].
pub const HEADER_LEN: usize = 40;

/// A 64-bit identifier routing a call to a registered handler, logically a
/// pair `(interface_id, method_id)`. Equality compares the whole 64-bit
/// value; the pair is never accessed through physical field overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionID(u64);

impl FunctionID {
    /// Build a `FunctionID` from its constituent interface and method ids.
    /// Per the wire format, the interface id occupies the low 32 bits and
    /// the method id the high 32 bits.
    pub const fn new(interface_id: u32, method_id: u32) -> Self {
        Self((interface_id as u64) | ((method_id as u64) << 32))
    }

    /// The raw 64-bit value, as transmitted on the wire.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Build a `FunctionID` from its raw 64-bit wire value.
    pub const fn from_u64(v: u64) -> Self {
        Self(v)
    }

    /// The interface id (low 32 bits).
    pub const fn interface_id(self) -> u32 {
        self.0 as u32
    }

    /// The method id (high 32 bits).
    pub const fn method_id(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// The fixed 40-byte header that prefaces every frame, request or
/// response. Fields are encoded little-endian with no padding between
/// them; see [`Header::encode`] for the exact byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub function: FunctionID,
    pub tag: u64,
    pub size: u32,
}

impl Header {
    /// Encode this header into a fixed 40-byte little-endian buffer.
    /// `reserved` is always written as zero.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..8].copy_from_slice(&MAGIC.to_le_bytes());
        buf[8..12].copy_from_slice(&VERSION.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.function.as_u64().to_le_bytes());
        buf[24..32].copy_from_slice(&self.tag.to_le_bytes());
        buf[32..40].copy_from_slice(&0u64.to_le_bytes());
        buf
    }

    /// Decode a header from an exact 40-byte buffer.
    ///
    /// A magic or version mismatch is fatal for the stream it came from;
    /// the caller is expected to close the stream on either error. The
    /// `reserved` field is read but never rejected on a nonzero value, to
    /// permit forward compatibility with future versions that use it for
    /// flags.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let magic = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic);
        }

        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != VERSION {
            return Err(ProtocolError::BadVersion);
        }

        let size = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let function = FunctionID::from_u64(u64::from_le_bytes(buf[16..24].try_into().unwrap()));
        let tag = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        // buf[32..40] is `reserved`; intentionally ignored.

        Ok(Header {
            function,
            tag,
            size,
        })
    }
}
