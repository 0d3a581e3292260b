//! binary-schema dialect: MessagePack with named fields
//!
//! Payloads are maps keyed by field name, so decoders skip fields they
//! do not know and peers can extend the schema without breaking older
//! servers. The method travels as a string enumerant; a method the
//! server does not recognize is answered with an UNKNOWN_METHOD error
//! correlated to the request id, which is always recoverable here
//! because the envelope decoded.

use super::{Decoded, ProtocolError};
use crate::types::{ErrorKind, Method, Request, Response, ResponseBody};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct WireRequest {
    id: u64,
    method: String,
    #[serde(rename = "type")]
    bucket: String,
    key: String,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    all: Option<bool>,
}

#[derive(Serialize)]
struct WireResponseRef<'a> {
    id: u64,
    body: &'a ResponseBody,
}

#[derive(Deserialize)]
struct WireResponse {
    id: u64,
    body: ResponseBody,
}

pub(super) fn decode_request(payload: &[u8]) -> Result<Decoded, ProtocolError> {
    let wire: WireRequest =
        rmp_serde::from_slice(payload).map_err(|e| ProtocolError::Decode(e.to_string()))?;

    let method = match wire.method.parse::<Method>() {
        Ok(method) => method,
        Err(e) => {
            return Ok(Decoded::Malformed {
                id: wire.id,
                kind: ErrorKind::UnknownMethod,
                message: e.to_string(),
            })
        }
    };

    Ok(Decoded::Request(Request {
        id: wire.id,
        method,
        bucket: wire.bucket,
        key: wire.key,
        count: wire.count.unwrap_or(1),
        all: wire.all.unwrap_or(false),
    }))
}

pub(super) fn encode_request(request: &Request) -> Result<Vec<u8>, ProtocolError> {
    let wire = WireRequest {
        id: request.id,
        method: request.method.as_str().to_string(),
        bucket: request.bucket.clone(),
        key: request.key.clone(),
        count: Some(request.count),
        all: Some(request.all),
    };
    rmp_serde::to_vec_named(&wire).map_err(|e| ProtocolError::Encode(e.to_string()))
}

pub(super) fn encode_response(response: &Response) -> Result<Vec<u8>, ProtocolError> {
    let wire = WireResponseRef {
        id: response.id,
        body: &response.body,
    };
    rmp_serde::to_vec_named(&wire).map_err(|e| ProtocolError::Encode(e.to_string()))
}

pub(super) fn decode_response(payload: &[u8]) -> Result<Response, ProtocolError> {
    let wire: WireResponse =
        rmp_serde::from_slice(payload).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    Ok(Response {
        id: wire.id,
        body: wire.body,
    })
}
