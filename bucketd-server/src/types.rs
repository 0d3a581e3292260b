//! Wire-neutral request and response types
//!
//! Both protocol dialects decode into and encode from these types; the
//! handler and the store actor never see dialect-specific
//! representations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Request methods understood by the service
///
/// `ERASE` is accepted as an alias for `RESET` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Take,
    Put,
    Wait,
    Status,
    Reset,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Take => "TAKE",
            Method::Put => "PUT",
            Method::Wait => "WAIT",
            Method::Status => "STATUS",
            Method::Reset => "RESET",
        }
    }
}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TAKE" => Ok(Method::Take),
            "PUT" => Ok(Method::Put),
            "WAIT" => Ok(Method::Wait),
            "STATUS" => Ok(Method::Status),
            "RESET" | "ERASE" => Ok(Method::Reset),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method enumerant the service does not recognize
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown method: {0}")]
pub struct UnknownMethod(pub String);

/// A decoded client request
///
/// `id` correlates the response; clients keep it unique per connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: Method,
    /// Bucket type name
    pub bucket: String,
    /// Instance key within the bucket type
    pub key: String,
    /// Tokens to take or put (defaults to 1 on the wire)
    pub count: u64,
    /// For PUT: fill to capacity instead of adding `count`
    pub all: bool,
}

/// A response correlated to a request by `id`
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub body: ResponseBody,
}

impl Response {
    pub fn error(id: u64, kind: ErrorKind, message: impl Into<String>) -> Self {
        Response {
            id,
            body: ResponseBody::Error(ErrorBody {
                kind,
                message: message.into(),
            }),
        }
    }
}

/// Response body variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseBody {
    Take(TakeBody),
    Put(PutBody),
    Status(StatusBody),
    Error(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeBody {
    /// Whether the requested count was granted
    pub conformant: bool,
    /// Whole tokens remaining after the operation
    pub remaining: u64,
    /// Burst capacity
    pub limit: u64,
    /// UNIX second at which the bucket refills to capacity
    pub reset: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutBody {
    pub remaining: u64,
    pub limit: u64,
    pub reset: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBody {
    /// One entry per observed instance, keyed by instance name
    pub items: BTreeMap<String, StatusItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusItem {
    pub remaining: u64,
    pub limit: u64,
    pub reset: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
}

/// Wire-visible error taxonomy for recoverable request failures
///
/// Framing and decode failures never reach the wire as errors; they
/// close the connection instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UnknownMethod,
    UnknownBucketType,
    Validation,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip() {
        for method in [
            Method::Take,
            Method::Put,
            Method::Wait,
            Method::Status,
            Method::Reset,
        ] {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
    }

    #[test]
    fn test_erase_is_reset_alias() {
        assert_eq!("ERASE".parse::<Method>().unwrap(), Method::Reset);
    }

    #[test]
    fn test_unknown_method_rejected() {
        assert!("FROB".parse::<Method>().is_err());
        // Methods are case-sensitive on the wire
        assert!("take".parse::<Method>().is_err());
    }
}
