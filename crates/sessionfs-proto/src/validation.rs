// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Schema validation for SessionFS control messages

use crate::messages::*;
use thiserror::Error;

/// Validation error
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("schema validation failed: {0}")]
    Schema(String),
    #[error("SSZ decoding failed: {0}")]
    SszDecode(String),
}

fn check_version(version: &[u8]) -> Result<(), ValidationError> {
    if version != PROTOCOL_VERSION {
        return Err(ValidationError::Schema("version must be '1'".to_string()));
    }
    Ok(())
}

fn check_absolute(path: &[u8]) -> Result<(), ValidationError> {
    if path.first() != Some(&b'/') {
        return Err(ValidationError::Schema(
            "path must be absolute".to_string(),
        ));
    }
    Ok(())
}

/// Validate a decoded request against its logical schema
pub fn validate_request(request: &Request) -> Result<(), ValidationError> {
    match request {
        Request::SessionOpen((version, req)) => {
            check_version(version)?;
            check_absolute(&req.path)?;
            if req.flags & O_SESS == 0 {
                return Err(ValidationError::Schema(
                    "open flags must carry the session bit".to_string(),
                ));
            }
            Ok(())
        },
        Request::SessionClose((version, req)) => {
            check_version(version)?;
            check_absolute(&req.path)
        },
        Request::Shutdown(version) => check_version(version),
    }
}

/// Validate a decoded response against its logical schema
pub fn validate_response(response: &Response) -> Result<(), ValidationError> {
    // For union responses, the structure is validated by the SSZ decoding itself
    // Error responses are always valid, success responses have their structure enforced by the union
    match response {
        Response::SessionOpen(_)
        | Response::SessionClose(_)
        | Response::Shutdown(_)
        | Response::Error(_) => Ok(()),
    }
}

/// Decode an SSZ request and validate it in one step
pub fn decode_and_validate_request(bytes: &[u8]) -> Result<Request, ValidationError> {
    let request = crate::decode_message::<Request>(bytes)
        .map_err(|e| ValidationError::SszDecode(format!("{e:?}")))?;
    validate_request(&request)?;
    Ok(request)
}

/// Decode an SSZ response and validate it in one step
pub fn decode_and_validate_response(bytes: &[u8]) -> Result<Response, ValidationError> {
    let response = crate::decode_message::<Response>(bytes)
        .map_err(|e| ValidationError::SszDecode(format!("{e:?}")))?;
    validate_response(&response)?;
    Ok(response)
}
