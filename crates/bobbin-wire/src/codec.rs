//! Line-level encode/decode for the newline-delimited wire.

use serde_json::Value;

use crate::error::{Result, WireError};
use crate::records::StreamRecord;

/// Decode one wire line into a record.
///
/// Malformed JSON is an error for the owning session to surface; an unknown
/// record type decodes to [`StreamRecord::Unknown`] and the session proceeds.
pub fn decode_line(line: &str) -> Result<StreamRecord> {
    let value: Value = serde_json::from_str(line.trim())?;
    if !value.is_object() {
        return Err(WireError::NotAnObject {
            got: truncate(line.trim(), 120).to_string(),
        });
    }
    Ok(StreamRecord::from_value(value)?)
}

/// Encode one record as a single wire line (no trailing newline).
///
/// Serialisation is deterministic: the same record always yields the same
/// bytes, so retries and tests can compare lines directly.
pub fn encode_line(record: &StreamRecord) -> Result<String> {
    Ok(serde_json::to_string(&record.to_value())?)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_json_is_an_error() {
        assert!(decode_line("not-json").is_err());
        assert!(decode_line("{\"type\":\"system\"").is_err());
    }

    #[test]
    fn non_object_is_an_error() {
        assert!(matches!(
            decode_line("[1,2,3]"),
            Err(WireError::NotAnObject { .. })
        ));
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let record = decode_line(r#"{"type":"telemetry","n":1}"#).unwrap();
        assert!(matches!(record, StreamRecord::Unknown(_)));
    }

    #[test]
    fn encoding_is_deterministic() {
        let record = decode_line(
            r#"{"type":"result","subtype":"success","duration_ms":12,"duration_api_ms":8,"is_error":false,"num_turns":1,"session_id":"s1"}"#,
        )
        .unwrap();
        let a = encode_line(&record).unwrap();
        let b = encode_line(&record).unwrap();
        assert_eq!(a, b);
    }
}
