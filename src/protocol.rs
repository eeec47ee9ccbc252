//! Wire protocol: one JSON object per newline-terminated line, both directions.
//!
//! Requests select an operation through their `"request"` field; unrecognized
//! fields are ignored. Responses always carry a `"status"` field of `"ok"`,
//! `"no-job"`, or `"error"`. Key order in rendered responses is not part of
//! the contract.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{json, Number, Value};
use thiserror::Error;

use crate::broker::job::{JobId, Priority};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Syntax(serde_json::Error),

    #[error("request is not an object")]
    NotAnObject,

    #[error("invalid request: {0}")]
    Invalid(serde_json::Error),
}

/// A well-formed broker request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum Request {
    Put {
        queue: String,
        #[serde(rename = "pri", deserialize_with = "de_priority")]
        priority: Priority,
        #[serde(rename = "job")]
        payload: Value,
    },
    Get {
        queues: Vec<String>,
        #[serde(default)]
        wait: bool,
    },
    Abort {
        #[serde(deserialize_with = "de_job_id")]
        id: i64,
    },
    Delete {
        #[serde(deserialize_with = "de_job_id")]
        id: i64,
    },
}

/// Parse one request line.
///
/// Parsing happens in two steps so that duplicate keys resolve to the last
/// occurrence and so syntax errors log distinctly from shape errors.
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let value: Value = serde_json::from_str(line).map_err(ProtocolError::Syntax)?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    serde_json::from_value(value).map_err(ProtocolError::Invalid)
}

/// A response destined for one client.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `{"status":"ok"}`: successful abort or delete.
    Ok,
    /// `{"status":"ok","id":N}`: job accepted.
    Submitted { id: JobId },
    /// Full job handed to a consumer, either immediately or on wake-up.
    Assigned {
        queue: String,
        priority: Priority,
        id: JobId,
        payload: Value,
    },
    /// `{"status":"no-job"}`: a domain miss, not an error.
    NoJob,
    /// `{"status":"error"}`: malformed request.
    Error,
}

impl Response {
    pub fn to_value(&self) -> Value {
        match self {
            Response::Ok => json!({"status": "ok"}),
            Response::Submitted { id } => json!({"status": "ok", "id": id}),
            Response::Assigned {
                queue,
                priority,
                id,
                payload,
            } => json!({
                "status": "ok",
                "queue": queue,
                "pri": priority,
                "id": id,
                "job": payload,
            }),
            Response::NoJob => json!({"status": "no-job"}),
            Response::Error => json!({"status": "error"}),
        }
    }

    /// Render as a newline-terminated wire line.
    pub fn to_line(&self) -> String {
        let mut line = self.to_value().to_string();
        line.push('\n');
        line
    }
}

/// `pri` must be exactly a non-negative integer; `5` and `5.0` both qualify,
/// `-1` and `3.5` do not.
fn de_priority<'de, D>(deserializer: D) -> Result<Priority, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Number::deserialize(deserializer)?;
    exact_priority(&number).ok_or_else(|| de::Error::custom("pri must be a non-negative integer"))
}

/// Job ids in abort/delete must be exactly integral. Negative integers are
/// well-formed (they match no job); fractional values are malformed.
fn de_job_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Number::deserialize(deserializer)?;
    exact_integer(&number).ok_or_else(|| de::Error::custom("id must be an integer"))
}

fn exact_priority(number: &Number) -> Option<Priority> {
    if let Some(value) = number.as_u64() {
        return Some(value);
    }
    let value = number.as_f64()?;
    if value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
        Some(value as u64)
    } else {
        None
    }
}

fn exact_integer(number: &Number) -> Option<i64> {
    if let Some(value) = number.as_i64() {
        return Some(value);
    }
    let value = number.as_f64()?;
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}
