//! Wire protocol: framing and the two payload dialects
//!
//! A server instance speaks exactly one dialect, selected by
//! configuration; a connection never mixes dialects.
//!
//! - [`Dialect::BinarySchema`]: MessagePack with named fields. Compact,
//!   typed, unknown fields in incoming frames are ignored.
//! - [`Dialect::TaggedJson`]: JSON where the body is a single-key
//!   wrapper naming the variant, e.g. `{"bucketd.StatusBody": {...}}`.
//!
//! Both dialects represent every method and every response variant.

pub mod frame;

mod binary;
mod json;

pub use frame::{FrameCodec, DEFAULT_MAX_FRAME};

use crate::types::{ErrorKind, Request, Response};
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by the frame and payload codecs
///
/// All of these are fatal to the connection; recoverable request
/// problems are represented by [`Decoded::Malformed`] instead.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame length {0} exceeds maximum {1}")]
    FrameTooLarge(u64, usize),
    #[error("malformed frame length prefix")]
    BadLengthPrefix,
    #[error("stream ended mid-frame")]
    Truncated,
    #[error("malformed payload: {0}")]
    Decode(String),
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

/// Outcome of decoding one request payload
#[derive(Debug)]
pub enum Decoded {
    Request(Request),
    /// The payload was structurally sound but carries a request the
    /// service cannot execute; answer with an error and keep the
    /// connection. `id` is the recovered correlation id.
    Malformed {
        id: u64,
        kind: ErrorKind,
        message: String,
    },
}

/// The payload encoding spoken by a server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    BinarySchema,
    TaggedJson,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::BinarySchema => "binary-schema",
            Dialect::TaggedJson => "tagged-json",
        }
    }
}

impl FromStr for Dialect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary-schema" => Ok(Dialect::BinarySchema),
            "tagged-json" => Ok(Dialect::TaggedJson),
            _ => Err(anyhow!(
                "invalid protocol: {}. Valid options are: binary-schema, tagged-json",
                s
            )),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload codec for one dialect
///
/// Request decoding distinguishes recoverable problems (unknown method,
/// returned as [`Decoded::Malformed`]) from fatal ones (a payload that
/// does not conform to the dialect schema, which closes the
/// connection). The request-encode and response-decode directions exist
/// for clients; the bundled integration tests are such a client.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    dialect: Dialect,
}

impl Codec {
    pub fn new(dialect: Dialect) -> Self {
        Codec { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn decode_request(&self, payload: &[u8]) -> Result<Decoded, ProtocolError> {
        match self.dialect {
            Dialect::BinarySchema => binary::decode_request(payload),
            Dialect::TaggedJson => json::decode_request(payload),
        }
    }

    pub fn encode_request(&self, request: &Request) -> Result<Vec<u8>, ProtocolError> {
        match self.dialect {
            Dialect::BinarySchema => binary::encode_request(request),
            Dialect::TaggedJson => json::encode_request(request),
        }
    }

    pub fn encode_response(&self, response: &Response) -> Result<Vec<u8>, ProtocolError> {
        match self.dialect {
            Dialect::BinarySchema => binary::encode_response(response),
            Dialect::TaggedJson => json::encode_response(response),
        }
    }

    pub fn decode_response(&self, payload: &[u8]) -> Result<Response, ProtocolError> {
        match self.dialect {
            Dialect::BinarySchema => binary::decode_response(payload),
            Dialect::TaggedJson => json::decode_response(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ErrorBody, Method, PutBody, ResponseBody, StatusBody, StatusItem, TakeBody,
    };
    use std::collections::BTreeMap;

    fn sample_requests() -> Vec<Request> {
        vec![
            Request {
                id: 1,
                method: Method::Take,
                bucket: "ip".into(),
                key: "10.0.0.1".into(),
                count: 1,
                all: false,
            },
            Request {
                id: 2,
                method: Method::Put,
                bucket: "ip".into(),
                key: "10.0.0.1".into(),
                count: 3,
                all: true,
            },
            Request {
                id: 3,
                method: Method::Wait,
                bucket: "user".into(),
                key: "u-77".into(),
                count: 2,
                all: false,
            },
            Request {
                id: u64::MAX,
                method: Method::Status,
                bucket: "ip".into(),
                key: "10.0.0.*".into(),
                count: 1,
                all: false,
            },
            Request {
                id: 5,
                method: Method::Reset,
                bucket: "ip".into(),
                key: "10.0.0.1".into(),
                count: 1,
                all: false,
            },
        ]
    }

    fn sample_responses() -> Vec<Response> {
        let mut items = BTreeMap::new();
        items.insert(
            "10.0.0.1".to_string(),
            StatusItem {
                remaining: 4,
                limit: 10,
                reset: 1_700_000_123,
            },
        );
        vec![
            Response {
                id: 1,
                body: ResponseBody::Take(TakeBody {
                    conformant: true,
                    remaining: 9,
                    limit: 10,
                    reset: 1_700_000_100,
                }),
            },
            Response {
                id: 2,
                body: ResponseBody::Put(PutBody {
                    remaining: 10,
                    limit: 10,
                    reset: 1_700_000_100,
                }),
            },
            Response {
                id: u64::MAX,
                body: ResponseBody::Status(StatusBody { items }),
            },
            Response {
                id: 0,
                body: ResponseBody::Error(ErrorBody {
                    kind: ErrorKind::UnknownBucketType,
                    message: "unknown bucket type: nope".into(),
                }),
            },
        ]
    }

    #[test]
    fn test_request_round_trip_both_dialects() {
        for dialect in [Dialect::BinarySchema, Dialect::TaggedJson] {
            let codec = Codec::new(dialect);
            for request in sample_requests() {
                let bytes = codec.encode_request(&request).unwrap();
                match codec.decode_request(&bytes).unwrap() {
                    Decoded::Request(decoded) => assert_eq!(decoded, request, "{dialect}"),
                    Decoded::Malformed { .. } => panic!("legal request decoded as malformed"),
                }
            }
        }
    }

    #[test]
    fn test_response_round_trip_both_dialects() {
        for dialect in [Dialect::BinarySchema, Dialect::TaggedJson] {
            let codec = Codec::new(dialect);
            for response in sample_responses() {
                let bytes = codec.encode_response(&response).unwrap();
                let decoded = codec.decode_response(&bytes).unwrap();
                assert_eq!(decoded, response, "{dialect}");
            }
        }
    }

    #[test]
    fn test_garbage_payload_is_fatal() {
        for dialect in [Dialect::BinarySchema, Dialect::TaggedJson] {
            let codec = Codec::new(dialect);
            assert!(codec.decode_request(&[0xff, 0x00, 0x13, 0x37]).is_err());
        }
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!(
            "binary-schema".parse::<Dialect>().unwrap(),
            Dialect::BinarySchema
        );
        assert_eq!("tagged-json".parse::<Dialect>().unwrap(), Dialect::TaggedJson);
        assert!("msgpack".parse::<Dialect>().is_err());
    }
}
