// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use bytes::Bytes;

use rpc_core::iovec::BufferList;

#[test]
fn total_len_sums_segments() {
    let mut l = BufferList::new();
    l.push(Bytes::from_static(b"hi"));
    l.push(Bytes::from_static(b"there"));
    assert_eq!(l.total_len(), 7);
}

#[test]
fn truncate_keeps_prefix_across_segments() {
    let mut l = BufferList::new();
    l.push(Bytes::from_static(b"abc"));
    l.push(Bytes::from_static(b"defgh"));
    l.truncate(5);
    assert_eq!(l.to_contiguous(), b"abcde");
}

#[test]
fn truncate_to_zero_empties_list() {
    let mut l = BufferList::new();
    l.push(Bytes::from_static(b"abc"));
    l.truncate(0);
    assert_eq!(l.total_len(), 0);
}

#[test]
fn single_variable_buffer_check() {
    let mut l = BufferList::new();
    l.push(Bytes::from_static(b"one"));
    assert!(l.check_single_variable_buffer().is_ok());
    l.push(Bytes::from_static(b"two"));
    assert!(l.check_single_variable_buffer().is_err());
}
