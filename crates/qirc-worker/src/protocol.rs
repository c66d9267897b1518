//! Wire format between the supervisor and a worker process.
//!
//! One request and one response, each a single line of JSON:
//!
//! ```text
//! → {"id":"…","source_name":"bell.qs","source":"…","profile":"base"}
//! ← {"id":"…","outcome":{"ir":"; ModuleID = 'bell.qs' …"}}
//! ← {"id":"…","outcome":{"error":{"Lowering":{…}}}}
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use qirc_compile::{CompileError, TargetProfile};

use crate::error::{WorkerError, WorkerResult};

/// A compilation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub source_name: String,
    pub source: String,
    pub profile: TargetProfile,
}

impl Request {
    /// Create a request with a fresh id.
    pub fn new(source_name: impl Into<String>, source: impl Into<String>, profile: TargetProfile) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_name: source_name.into(),
            source: source.into(),
            profile,
        }
    }
}

/// What the worker produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ir(String),
    Error(CompileError),
}

/// The reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Echo of [`Request::id`].
    pub id: Uuid,
    pub outcome: Outcome,
}

/// Serialize `value` as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> WorkerResult<Vec<u8>> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(line)
}

pub fn decode_request(line: &[u8]) -> WorkerResult<Request> {
    Ok(serde_json::from_slice(trim_ascii(line))?)
}

/// Decode the complete stdout of a worker and check it answers `expected`.
pub fn decode_response(output: &[u8], expected: Uuid) -> WorkerResult<Response> {
    let body = trim_ascii(output);
    if body.is_empty() {
        return Err(WorkerError::NoResponse);
    }
    let response: Response =
        serde_json::from_slice(body).map_err(|e| WorkerError::Protocol(e.to_string()))?;
    if response.id != expected {
        return Err(WorkerError::Protocol(format!(
            "response id {} does not match request {expected}",
            response.id
        )));
    }
    Ok(response)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use qirc_compile::LoweringError;

    #[test]
    fn test_request_is_one_line() {
        let req = Request::new("a.qs", "namespace A {\n}\n", TargetProfile::Adaptive);
        let line = encode_line(&req).unwrap();
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
        assert!(String::from_utf8_lossy(&line).contains("\"profile\":\"adaptive\""));
        assert_eq!(decode_request(&line).unwrap(), req);
    }

    #[test]
    fn test_outcome_tags() {
        let id = Uuid::new_v4();
        let ok = Response { id, outcome: Outcome::Ir("ir".into()) };
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"outcome\":{\"ir\":\"ir\"}"));

        let err = Response {
            id,
            outcome: Outcome::Error(CompileError::Lowering(LoweringError::MissingEntryPoint)),
        };
        let line = encode_line(&err).unwrap();
        assert_eq!(decode_response(&line, id).unwrap(), err);
    }

    #[test]
    fn test_decode_faults() {
        let id = Uuid::new_v4();
        assert!(matches!(decode_response(b"", id), Err(WorkerError::NoResponse)));
        assert!(matches!(decode_response(b"  \n", id), Err(WorkerError::NoResponse)));
        assert!(matches!(decode_response(b"{not json", id), Err(WorkerError::Protocol(_))));

        let other = Response { id: Uuid::new_v4(), outcome: Outcome::Ir(String::new()) };
        let line = encode_line(&other).unwrap();
        let err = decode_response(&line, id).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}
