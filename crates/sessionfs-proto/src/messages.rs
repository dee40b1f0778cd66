// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Control plane message types for SessionFS

use ssz_derive::{Decode, Encode};

// SSZ Union-based request/response types for type-safe communication
// Using Vec<u8> for strings as SSZ supports variable-length byte vectors

/// Protocol schema version carried by every request.
pub const PROTOCOL_VERSION: &[u8] = b"1";

/// Flag bit that opts an open into session semantics. Repurposed from an
/// unused slot of the host's fcntl flag space.
pub const O_SESS: u32 = 0o10000000;

/// ioctl sequence number of the open-session command on the classic
/// character-device transport.
pub const IOCTL_SEQ_OPEN: u32 = 0;
/// ioctl sequence number of the close-session command.
pub const IOCTL_SEQ_CLOSE: u32 = 1;
/// ioctl sequence number of the shutdown command.
pub const IOCTL_SEQ_SHUTDOWN: u32 = 10;

/// Request union - each variant contains version and operation-specific data
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[ssz(enum_behaviour = "union")]
pub enum Request {
    SessionOpen((Vec<u8>, SessionOpenRequest)),   // (version, request)
    SessionClose((Vec<u8>, SessionCloseRequest)), // (version, request)
    Shutdown(Vec<u8>),                            // version
}

/// Response union - operation-specific success responses or errors
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[ssz(enum_behaviour = "union")]
pub enum Response {
    SessionOpen(SessionOpenResponse),
    SessionClose(SessionCloseResponse),
    Shutdown(ShutdownResponse),
    Error(ErrorResponse),
}

/// Error response
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ErrorResponse {
    pub error: Vec<u8>,
    /// Positive errno magnitude when the failure maps to a host error code.
    pub code: Option<u32>,
}

/// Open-session request payload.
///
/// `flags` must carry [`O_SESS`]; the core strips it before the host open.
/// `mode` applies when the open creates the original or the incarnation
/// (0o644 is the conventional default used by the shim).
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SessionOpenRequest {
    pub path: Vec<u8>,
    pub flags: u32,
    pub mode: u32,
    pub pid: u32,
}

/// Open-session response payload.
///
/// `status` is 0 when the incarnation is valid, otherwise the positive
/// errno magnitude recorded by copy-on-open; a non-zero status means the
/// incarnation is open but corrupt and must be closed by the caller.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SessionOpenResponse {
    pub fd: u32,
    pub status: u32,
}

/// Close-session request payload
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SessionCloseRequest {
    pub path: Vec<u8>,
    pub fd: u32,
    pub pid: u32,
}

/// Close-session response payload (empty on success)
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SessionCloseResponse {}

/// Shutdown response payload with the number of active incarnations at
/// attempt time
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ShutdownResponse {
    pub active: u64,
}

impl Request {
    pub fn session_open(path: String, flags: u32, mode: u32, pid: u32) -> Self {
        Self::SessionOpen((
            PROTOCOL_VERSION.to_vec(),
            SessionOpenRequest {
                path: path.into_bytes(),
                flags,
                mode,
                pid,
            },
        ))
    }

    pub fn session_close(path: String, fd: u32, pid: u32) -> Self {
        Self::SessionClose((
            PROTOCOL_VERSION.to_vec(),
            SessionCloseRequest {
                path: path.into_bytes(),
                fd,
                pid,
            },
        ))
    }

    pub fn shutdown() -> Self {
        Self::Shutdown(PROTOCOL_VERSION.to_vec())
    }
}

impl Response {
    pub fn error(message: impl Into<String>, code: Option<u32>) -> Self {
        Self::Error(ErrorResponse {
            error: message.into().into_bytes(),
            code,
        })
    }
}
