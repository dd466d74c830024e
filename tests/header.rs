// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use rpc_core::error::ProtocolError;
use rpc_core::header::{FunctionID, Header, HEADER_LEN};

#[test]
fn round_trip() {
    let h = Header {
        function: FunctionID::new(1, 1),
        tag: 42,
        size: 17,
    };
    let buf = h.encode();
    let decoded = Header::decode(&buf).unwrap();
    assert_eq!(h, decoded);
}

#[test]
fn function_id_splits_interface_and_method() {
    let f = FunctionID::new(0xAABB_CCDD, 0x1122_3344);
    assert_eq!(f.interface_id(), 0xAABB_CCDD);
    assert_eq!(f.method_id(), 0x1122_3344);
    assert_eq!(f, FunctionID::from_u64(f.as_u64()));
}

#[test]
fn bad_magic_is_rejected() {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..8].copy_from_slice(&0u64.to_le_bytes());
    assert_eq!(Header::decode(&buf), Err(ProtocolError::BadMagic));
}

#[test]
fn bad_version_is_rejected() {
    let mut buf = Header {
        function: FunctionID::new(0, 0),
        tag: 0,
        size: 0,
    }
    .encode();
    buf[8..12].copy_from_slice(&1u32.to_le_bytes());
    assert_eq!(Header::decode(&buf), Err(ProtocolError::BadVersion));
}

#[test]
fn nonzero_reserved_is_accepted() {
    let mut buf = Header {
        function: FunctionID::new(0, 0),
        tag: 0,
        size: 0,
    }
    .encode();
    buf[32..40].copy_from_slice(&0xFFFF_FFFF_FFFF_FFFFu64.to_le_bytes());
    assert!(Header::decode(&buf).is_ok());
}
