//! Envelope codec for the management payload
//!
//! Every management message carries a correlation id under `reqId`. Device
//! requests wrap their operation data under `d`, controller responses and
//! device acknowledgments carry a result code under `rc`.
//!
//! ```text
//! device → controller   { "d": { .. }, "reqId": "<uuid>" }
//! controller → device   { "rc": 200, "reqId": "<uuid>" }
//! device ack            { "rc": 202 | 500, "reqId": "<controller id>" }
//! ```

use super::error::ManagementError;
use super::request::ManagementRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Opaque token linking a request to its response or acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Fresh v4 UUID for a device-initiated request
    pub fn generate() -> Self {
        CorrelationId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        CorrelationId(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        CorrelationId(value)
    }
}

/// Integer status carried under `rc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub i64);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(200);
    pub const ACCEPTED: ResultCode = ResultCode(202);
    pub const REJECTED: ResultCode = ResultCode(500);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application decision on a controller-initiated action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Accept,
    Reject,
}

impl AckDecision {
    pub fn result_code(self) -> ResultCode {
        match self {
            AckDecision::Accept => ResultCode::ACCEPTED,
            AckDecision::Reject => ResultCode::REJECTED,
        }
    }
}

impl From<bool> for AckDecision {
    fn from(accept: bool) -> Self {
        if accept {
            AckDecision::Accept
        } else {
            AckDecision::Reject
        }
    }
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<&'a ManagementRequest>,
    #[serde(rename = "reqId")]
    req_id: &'a CorrelationId,
}

#[derive(Serialize)]
struct AckEnvelope<'a> {
    rc: ResultCode,
    #[serde(rename = "reqId")]
    req_id: &'a CorrelationId,
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "reqId")]
    req_id: Option<CorrelationId>,
    rc: Option<i64>,
    d: Option<Value>,
}

/// Response to a device-initiated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResponse {
    pub correlation_id: CorrelationId,
    pub result_code: ResultCode,
}

/// Controller-initiated action request
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAction {
    pub correlation_id: CorrelationId,
    pub body: Option<Value>,
}

/// Generates a correlation id and serializes the request around it
pub fn encode_request(
    request: &ManagementRequest,
) -> Result<(CorrelationId, Vec<u8>), ManagementError> {
    let correlation_id = CorrelationId::generate();
    let envelope = RequestEnvelope {
        d: request.has_body().then_some(request),
        req_id: &correlation_id,
    };
    let bytes = serde_json::to_vec(&envelope)
        .map_err(|e| ManagementError::invalid(format!("unserializable request: {}", e)))?;
    Ok((correlation_id, bytes))
}

pub fn decode_response(bytes: &[u8]) -> Result<DecodedResponse, ManagementError> {
    let envelope = parse_inbound(bytes)?;
    let correlation_id = envelope
        .req_id
        .ok_or_else(|| ManagementError::MalformedEnvelope("missing reqId".to_string()))?;
    let rc = envelope
        .rc
        .ok_or_else(|| ManagementError::MalformedEnvelope("missing rc".to_string()))?;

    Ok(DecodedResponse {
        correlation_id,
        result_code: ResultCode(rc),
    })
}

pub fn decode_action_request(bytes: &[u8]) -> Result<DecodedAction, ManagementError> {
    let envelope = parse_inbound(bytes)?;
    let correlation_id = envelope
        .req_id
        .ok_or_else(|| ManagementError::MalformedEnvelope("missing reqId".to_string()))?;

    Ok(DecodedAction {
        correlation_id,
        body: envelope.d,
    })
}

/// Accept maps to 202, reject to 500
pub fn encode_ack(
    correlation_id: &CorrelationId,
    decision: AckDecision,
) -> Result<Vec<u8>, ManagementError> {
    let envelope = AckEnvelope {
        rc: decision.result_code(),
        req_id: correlation_id,
    };
    serde_json::to_vec(&envelope)
        .map_err(|e| ManagementError::invalid(format!("unserializable ack: {}", e)))
}

fn parse_inbound(bytes: &[u8]) -> Result<InboundEnvelope, ManagementError> {
    serde_json::from_slice(bytes).map_err(|e| ManagementError::MalformedEnvelope(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response_fixture(id: &str, rc: i64) -> Vec<u8> {
        serde_json::to_vec(&json!({ "rc": rc, "reqId": id })).unwrap()
    }

    #[test]
    fn test_encode_request_embeds_generated_id() {
        let request = ManagementRequest::manage(Some(3600), None, None).unwrap();
        let (id, bytes) = encode_request(&request).unwrap();

        let wire: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(wire["reqId"], json!(id.as_str()));
        assert_eq!(wire["d"], json!({ "lifetime": 3600 }));
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_encode_request_without_body_omits_d() {
        let (id, bytes) = encode_request(&ManagementRequest::Unmanage).unwrap();

        let wire: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(wire, json!({ "reqId": id.as_str() }));
    }

    #[test]
    fn test_generated_ids_differ() {
        let (first, _) = encode_request(&ManagementRequest::ClearLogs).unwrap();
        let (second, _) = encode_request(&ManagementRequest::ClearLogs).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_decode_response_keeps_failure_codes() {
        for rc in [200, 400, 404, 409, 500] {
            let decoded = decode_response(&response_fixture("req-1", rc)).unwrap();
            assert_eq!(decoded.correlation_id, CorrelationId::from("req-1"));
            assert_eq!(decoded.result_code, ResultCode(rc));
            assert_eq!(decoded.result_code.is_success(), rc == 200);
        }
    }

    #[test]
    fn test_decode_response_without_req_id_is_malformed() {
        let bytes = serde_json::to_vec(&json!({ "rc": 200 })).unwrap();
        assert!(matches!(
            decode_response(&bytes),
            Err(ManagementError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(matches!(
            decode_response(b"not json"),
            Err(ManagementError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode_action_request(b"{\"reqId\": 17}"),
            Err(ManagementError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_decode_action_request_keeps_body() {
        let bytes =
            serde_json::to_vec(&json!({ "reqId": "abc", "d": { "uri": "http://fw" } })).unwrap();
        let decoded = decode_action_request(&bytes).unwrap();

        assert_eq!(decoded.correlation_id.as_str(), "abc");
        assert_eq!(decoded.body, Some(json!({ "uri": "http://fw" })));
    }

    #[test]
    fn test_encode_ack_codes() {
        let id = CorrelationId::from("abc");

        let accepted: Value = serde_json::from_slice(&encode_ack(&id, true.into()).unwrap()).unwrap();
        assert_eq!(accepted, json!({ "rc": 202, "reqId": "abc" }));

        let rejected: Value =
            serde_json::from_slice(&encode_ack(&id, AckDecision::Reject).unwrap()).unwrap();
        assert_eq!(rejected, json!({ "rc": 500, "reqId": "abc" }));
    }
}
