//! Tolerant decoding of upstream webhook replies.
//!
//! The automation backend answers with well-formed JSON most of the time,
//! but also with double-encoded JSON strings, JSON buried in HTML or log
//! noise, and bare `Accepted` / `OK` text. `decode_response` walks a fixed
//! ladder of strategies and reports which outcome it reached; it never
//! attempts textual "repair" of broken JSON.

use serde_json::Value;

/// Keys under which an envelope object has been seen carrying the real
/// payload as a serialized JSON string.
const WRAPPER_KEYS: [&str; 5] = ["make_response", "response", "body", "payload", "result"];

/// Nested string envelopes are followed at most this deep.
const MAX_UNWRAP_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(Value),
    /// Bare `accepted` / `ok` (any case).
    TextualSuccess,
    Undecodable,
}

/// Decode a raw upstream body.
pub fn decode_response(raw: &str) -> Decoded {
    let cleaned = strip_bom(raw);
    if let Some(value) = extract_json(cleaned) {
        return Decoded::Json(unwrap_envelope(value, 0));
    }
    if cleaned.eq_ignore_ascii_case("accepted") || cleaned.eq_ignore_ascii_case("ok") {
        return Decoded::TextualSuccess;
    }
    Decoded::Undecodable
}

fn strip_bom(raw: &str) -> &str {
    raw.strip_prefix('\u{feff}').unwrap_or(raw).trim()
}

/// Null parses are treated as failures so the ladder keeps going.
fn try_json(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) | Err(_) => None,
        Ok(v) => Some(v),
    }
}

fn extract_json(cleaned: &str) -> Option<Value> {
    // 1. direct parse
    let direct = try_json(cleaned);
    let unquoted: String;
    let mut text = cleaned;
    match direct {
        // A quoted payload parses as a JSON string; fall through to unwrap it.
        Some(Value::String(_)) if is_quoted(cleaned) => {}
        Some(v) => return Some(v),
        None => {}
    }

    // 2. one level of double encoding
    if is_quoted(cleaned) {
        if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(cleaned) {
            unquoted = inner.trim().to_string();
            text = unquoted.as_str();
            if let Some(v) = try_json(text) {
                return Some(v);
            }
        }
    }

    // 3. first balanced-looking block inside surrounding noise
    let bytes = text.as_bytes();
    let start = memchr::memchr2(b'{', b'[', bytes)?;
    let tail = &bytes[start..];
    let end = memchr::memrchr2(b'}', b']', tail)?;
    if end == 0 {
        return None;
    }
    // Both offsets sit on ASCII delimiters, so the slice is valid UTF-8.
    try_json(&text[start..start + end + 1])
}

fn is_quoted(text: &str) -> bool {
    text.len() >= 2 && text.starts_with('"') && text.ends_with('"')
}

/// Prefer a structured payload serialized inside a known wrapper key.
fn unwrap_envelope(value: Value, depth: usize) -> Value {
    if depth >= MAX_UNWRAP_DEPTH {
        return value;
    }
    let inner = match &value {
        Value::Object(map) => WRAPPER_KEYS.iter().find_map(|key| {
            let text = map.get(*key)?.as_str()?;
            match extract_json(strip_bom(text))? {
                v @ (Value::Object(_) | Value::Array(_)) => Some(v),
                _ => None,
            }
        }),
        _ => None,
    };
    match inner {
        Some(inner) => unwrap_envelope(inner, depth + 1),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_json() {
        assert_eq!(
            decode_response(" {\"status\":\"success\"}\n"),
            Decoded::Json(json!({"status": "success"}))
        );
    }

    #[test]
    fn strips_byte_order_mark() {
        assert_eq!(
            decode_response("\u{feff}[1,2]"),
            Decoded::Json(json!([1, 2]))
        );
    }

    #[test]
    fn undoes_one_level_of_double_encoding() {
        let raw = "\"{\\\"status\\\":\\\"success\\\"}\"";
        assert_eq!(
            decode_response(raw),
            Decoded::Json(json!({"status": "success"}))
        );
    }

    #[test]
    fn extracts_json_embedded_in_html() {
        let raw = "<html>noise{\"status\":\"success\",\"incidents\":[]}more noise</html>";
        assert_eq!(
            decode_response(raw),
            Decoded::Json(json!({"status": "success", "incidents": []}))
        );
    }

    #[test]
    fn textual_success_sentinels() {
        assert_eq!(decode_response("Accepted"), Decoded::TextualSuccess);
        assert_eq!(decode_response("  ok \r\n"), Decoded::TextualSuccess);
        assert_eq!(decode_response("\u{feff}ACCEPTED"), Decoded::TextualSuccess);
    }

    #[test]
    fn garbage_is_undecodable() {
        assert_eq!(decode_response("Scenario failed"), Decoded::Undecodable);
        assert_eq!(decode_response(""), Decoded::Undecodable);
        assert_eq!(decode_response("null"), Decoded::Undecodable);
        assert_eq!(decode_response("<p>{broken</p>"), Decoded::Undecodable);
    }

    #[test]
    fn quoted_plain_text_is_not_json() {
        // A JSON string literal that holds prose is neither structured nor a sentinel.
        assert_eq!(decode_response("\"gracias\""), Decoded::Undecodable);
    }

    #[test]
    fn prefers_payload_serialized_inside_wrapper_key() {
        let inner = json!({"status": "success", "incidents": [{"id": "INC-9"}]}).to_string();
        let raw = json!({"make_response": inner, "code": 200}).to_string();
        match decode_response(&raw) {
            Decoded::Json(v) => {
                assert_eq!(v["incidents"][0]["id"], json!("INC-9"));
                assert!(v.get("code").is_none());
            }
            other => panic!("expected json, got {other:?}"),
        }
    }

    #[test]
    fn wrapper_with_prose_is_left_alone() {
        let raw = json!({"status": "success", "response": "todo bien"}).to_string();
        assert_eq!(
            decode_response(&raw),
            Decoded::Json(json!({"status": "success", "response": "todo bien"}))
        );
    }
}
