//! tagged-json dialect
//!
//! Payloads are JSON envelopes whose `body` is a single-key object
//! naming the variant:
//!
//! ```json
//! {"request_id": 7, "body": {"bucketd.TakeRequest": {"type": "ip", "key": "10.0.0.1"}}}
//! {"request_id": 7, "body": {"bucketd.TakeBody": {"conformant": true, ...}}}
//! ```

use super::{Decoded, ProtocolError};
use crate::types::{
    ErrorBody, ErrorKind, Method, PutBody, Request, Response, ResponseBody, StatusBody, TakeBody,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Serialize, Deserialize)]
struct ReqFields {
    #[serde(rename = "type")]
    bucket: String,
    key: String,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    all: Option<bool>,
}

#[derive(Serialize, Deserialize)]
enum WireBody {
    #[serde(rename = "bucketd.TakeBody")]
    Take(TakeBody),
    #[serde(rename = "bucketd.PutBody")]
    Put(PutBody),
    #[serde(rename = "bucketd.StatusBody")]
    Status(StatusBody),
    #[serde(rename = "bucketd.ErrorBody")]
    Error(ErrorBody),
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    request_id: u64,
    body: WireBody,
}

fn request_tag(method: Method) -> &'static str {
    match method {
        Method::Take => "bucketd.TakeRequest",
        Method::Put => "bucketd.PutRequest",
        Method::Wait => "bucketd.WaitRequest",
        Method::Status => "bucketd.StatusRequest",
        Method::Reset => "bucketd.ResetRequest",
    }
}

fn method_for_tag(tag: &str) -> Option<Method> {
    match tag {
        "bucketd.TakeRequest" => Some(Method::Take),
        "bucketd.PutRequest" => Some(Method::Put),
        "bucketd.WaitRequest" => Some(Method::Wait),
        "bucketd.StatusRequest" => Some(Method::Status),
        "bucketd.ResetRequest" | "bucketd.EraseRequest" => Some(Method::Reset),
        _ => None,
    }
}

pub(super) fn decode_request(payload: &[u8]) -> Result<Decoded, ProtocolError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| ProtocolError::Decode(e.to_string()))?;

    let id = value
        .get("request_id")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::Decode("missing request_id".into()))?;

    let body = value
        .get("body")
        .and_then(Value::as_object)
        .ok_or_else(|| ProtocolError::Decode("missing body wrapper".into()))?;
    if body.len() != 1 {
        return Err(ProtocolError::Decode(
            "body must hold exactly one variant".into(),
        ));
    }
    let (tag, fields) = body.iter().next().expect("length checked above");

    let Some(method) = method_for_tag(tag) else {
        return Ok(Decoded::Malformed {
            id,
            kind: ErrorKind::UnknownMethod,
            message: format!("unknown method: {tag}"),
        });
    };

    let fields: ReqFields =
        serde_json::from_value(fields.clone()).map_err(|e| ProtocolError::Decode(e.to_string()))?;

    Ok(Decoded::Request(Request {
        id,
        method,
        bucket: fields.bucket,
        key: fields.key,
        count: fields.count.unwrap_or(1),
        all: fields.all.unwrap_or(false),
    }))
}

pub(super) fn encode_request(request: &Request) -> Result<Vec<u8>, ProtocolError> {
    let fields = ReqFields {
        bucket: request.bucket.clone(),
        key: request.key.clone(),
        count: Some(request.count),
        all: Some(request.all),
    };
    let envelope = json!({
        "request_id": request.id,
        "body": { request_tag(request.method): fields },
    });
    serde_json::to_vec(&envelope).map_err(|e| ProtocolError::Encode(e.to_string()))
}

pub(super) fn encode_response(response: &Response) -> Result<Vec<u8>, ProtocolError> {
    let wire = WireResponse {
        request_id: response.id,
        body: response.body.clone().into(),
    };
    serde_json::to_vec(&wire).map_err(|e| ProtocolError::Encode(e.to_string()))
}

pub(super) fn decode_response(payload: &[u8]) -> Result<Response, ProtocolError> {
    let wire: WireResponse =
        serde_json::from_slice(payload).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    Ok(Response {
        id: wire.request_id,
        body: wire.body.into(),
    })
}

impl From<ResponseBody> for WireBody {
    fn from(body: ResponseBody) -> Self {
        match body {
            ResponseBody::Take(b) => WireBody::Take(b),
            ResponseBody::Put(b) => WireBody::Put(b),
            ResponseBody::Status(b) => WireBody::Status(b),
            ResponseBody::Error(b) => WireBody::Error(b),
        }
    }
}

impl From<WireBody> for ResponseBody {
    fn from(body: WireBody) -> Self {
        match body {
            WireBody::Take(b) => ResponseBody::Take(b),
            WireBody::Put(b) => ResponseBody::Put(b),
            WireBody::Status(b) => ResponseBody::Status(b),
            WireBody::Error(b) => ResponseBody::Error(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_wrapper_names_variant() {
        let response = Response {
            id: 7,
            body: ResponseBody::Take(TakeBody {
                conformant: true,
                remaining: 9,
                limit: 10,
                reset: 1_700_000_100,
            }),
        };

        let bytes = encode_response(&response).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["request_id"], 7);
        assert!(value["body"].get("bucketd.TakeBody").is_some());
    }

    #[test]
    fn test_unknown_tag_recovers_id() {
        let payload = serde_json::to_vec(&json!({
            "request_id": 41,
            "body": {"bucketd.FrobRequest": {"type": "ip", "key": "k"}},
        }))
        .unwrap();

        match decode_request(&payload).unwrap() {
            Decoded::Malformed { id, kind, .. } => {
                assert_eq!(id, 41);
                assert_eq!(kind, ErrorKind::UnknownMethod);
            }
            Decoded::Request(_) => panic!("unknown tag should not decode as a request"),
        }
    }

    #[test]
    fn test_erase_tag_maps_to_reset() {
        let payload = serde_json::to_vec(&json!({
            "request_id": 1,
            "body": {"bucketd.EraseRequest": {"type": "ip", "key": "k"}},
        }))
        .unwrap();

        match decode_request(&payload).unwrap() {
            Decoded::Request(request) => assert_eq!(request.method, Method::Reset),
            Decoded::Malformed { .. } => panic!(),
        }
    }

    #[test]
    fn test_missing_request_id_is_fatal() {
        let payload = serde_json::to_vec(&json!({
            "body": {"bucketd.TakeRequest": {"type": "ip", "key": "k"}},
        }))
        .unwrap();
        assert!(decode_request(&payload).is_err());
    }

    #[test]
    fn test_multi_key_body_is_fatal() {
        let payload = serde_json::to_vec(&json!({
            "request_id": 1,
            "body": {
                "bucketd.TakeRequest": {"type": "ip", "key": "k"},
                "bucketd.PutRequest": {"type": "ip", "key": "k"},
            },
        }))
        .unwrap();
        assert!(decode_request(&payload).is_err());
    }
}
