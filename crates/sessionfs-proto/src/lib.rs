// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SessionFS Protocol - Control plane types and validation
//!
//! This crate defines the fixed-layout request/response schemas for the
//! SessionFS control channel, used by the user-space shim and any other
//! collaborator that drives the session core. The transport itself (a
//! character device in the classic deployment) is out of scope; this crate
//! only owns the bytes that travel over it.

pub mod messages;
pub mod validation;

// Re-export key types
pub use messages::{
    ErrorResponse,
    Request,
    Response,
    SessionCloseRequest,
    SessionCloseResponse,
    SessionOpenRequest,
    SessionOpenResponse,
    ShutdownResponse,
    IOCTL_SEQ_CLOSE,
    IOCTL_SEQ_OPEN,
    IOCTL_SEQ_SHUTDOWN,
    O_SESS,
    PROTOCOL_VERSION,
};
pub use validation::*;

// SSZ encoding/decoding utilities
use ssz::{Decode, Encode};

/// Encode a message using SSZ
pub fn encode_message(data: &impl Encode) -> Vec<u8> {
    data.as_ssz_bytes()
}

/// Decode a message from SSZ bytes
pub fn decode_message<T: Decode>(data: &[u8]) -> Result<T, ssz::DecodeError> {
    T::from_ssz_bytes(data)
}
