use log::trace;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::state::status_word::DecodedStatus;

/// A state broadcast decoded from one datagram.
///
/// On the wire the JSON envelope looks like
/// `{"device_id":"10b41d181e58","message_id":"...","state_string":"20,1,B,...,END"}`,
/// usually hex-encoded as ASCII.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatePayload {
    pub device_id: String,
    pub message_id: String,
    /// The raw comma-separated state string, only the first field is interpreted.
    pub state_string: String,
    pub status: DecodedStatus,
}

impl StatePayload {
    /// Decodes a datagram into a state payload.
    ///
    /// Returns `None` for anything that is not a well-formed state broadcast:
    /// beacons and noise share the port, so callers skip these silently.
    pub fn from_datagram(data: &[u8]) -> Option<Self> {
        let envelope = decode_envelope(data)?;
        Self::from_envelope(&envelope)
    }

    pub fn from_envelope(envelope: &Map<String, Value>) -> Option<Self> {
        let state_string = match envelope.get("state_string") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => {
                trace!("Envelope has no state_string, skipping");
                return None;
            }
        };

        let first_field = state_string.split(',').map(str::trim).next()?;
        let value = match parse_status_value(first_field) {
            Some(value) => value,
            None => {
                trace!("Could not parse status value {:?}", first_field);
                return None;
            }
        };

        Some(StatePayload {
            device_id: field_to_string(envelope.get("device_id")),
            message_id: field_to_string(envelope.get("message_id")),
            state_string,
            status: DecodedStatus::decode(value),
        })
    }

    /// Case-insensitive comparison against a device identifier.
    pub fn matches_device(&self, device_id: &str) -> bool {
        self.device_id.eq_ignore_ascii_case(device_id)
    }
}

fn field_to_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Extracts the JSON object carried by a state datagram, hex-encoded or plain.
pub fn decode_envelope(data: &[u8]) -> Option<Map<String, Value>> {
    let text = match std::str::from_utf8(data) {
        Ok(s) if s.is_ascii() => s.to_string(),
        _ => String::from_utf8_lossy(data).into_owned(),
    };
    let text = text.trim();

    // Some stacks pad datagrams with NUL bytes.
    let stripped = text.replace('\0', "");
    for candidate in [text, stripped.trim()] {
        if let Some(object) = decode_candidate(candidate) {
            return Some(object);
        }
    }
    None
}

fn decode_candidate(candidate: &str) -> Option<Map<String, Value>> {
    if looks_like_hex(candidate) {
        let parsed = hex::decode(candidate)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|json| serde_json::from_str::<Value>(&json).ok());
        if let Some(Value::Object(object)) = parsed {
            return Some(object);
        }
    }

    if candidate.starts_with('{') && candidate.ends_with('}') {
        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(candidate) {
            return Some(object);
        }
    }

    None
}

fn looks_like_hex(candidate: &str) -> bool {
    candidate.len() >= 2
        && candidate.len() % 2 == 0
        && candidate.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parses the leading status field: decimal first, then hex (optionally `0x`-prefixed).
///
/// A zero-padded hex value such as `"10"` is read as decimal 10, never as 16.
pub fn parse_status_value(field: &str) -> Option<u32> {
    let field = field.trim();
    if let Ok(value) = field.parse::<u32>() {
        return Some(value);
    }
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    u32::from_str_radix(digits, 16).ok()
}
