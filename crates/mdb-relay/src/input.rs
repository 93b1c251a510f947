//! Decoding of relay input lines.
//!
//! Each non-blank stdin line is one JSON object with a `type` tag and a
//! `payload` object. Any `id` on the input is ignored: identifiers are
//! minted by the emitter only.

use mdb_events::{Event, EventType, Payload};
use serde::Deserialize;

/// One event as submitted on stdin.
#[derive(Debug, Deserialize)]
struct InputLine {
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(default)]
    payload: Payload,
}

/// Decode one input line.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// Returns the decode error for anything that is not a valid event object.
pub fn parse_line(line: &str) -> Result<Option<Event>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let input: InputLine = serde_json::from_str(line)?;
    Ok(Some(Event::new(input.event_type, input.payload)))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn parses_type_and_payload() {
        let event = parse_line(r#"{"type":"SOURCE_UPDATE","payload":{"id":4,"uid":"s4"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, EventType::SourceUpdate);
        assert_eq!(event.payload.get("uid"), Some(&serde_json::json!("s4")));
        assert!(event.id.is_empty());
    }

    #[test]
    fn supplied_id_is_discarded() {
        let event = parse_line(r#"{"id":"forged","type":"TAG_CREATE","payload":{}}"#)
            .unwrap()
            .unwrap();
        assert!(!event.has_id());
    }

    #[test]
    fn blank_line_is_skipped() {
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(parse_line(r#"{"type":"WHATEVER","payload":{}}"#).is_err());
    }

    #[test]
    fn missing_payload_defaults_to_empty() {
        let event = parse_line(r#"{"type":"PUBLISHER_CREATE"}"#).unwrap().unwrap();
        assert!(event.payload.is_empty());
    }
}
