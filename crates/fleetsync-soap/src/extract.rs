//! Best-effort extraction of record blocks from the opaque XML payloads the
//! legacy service returns. The payload has no formal schema and real
//! responses carry inconsistent field sets, so this module never fails on
//! malformed input: the worst case is an empty result.

use std::collections::BTreeMap;

use serde::Serialize;

/// A loosely-typed field as it comes off the wire. Values that look like
/// integers (optional leading minus, all digits) are promoted to `Int`;
/// everything else stays text. Empty values never make it into a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Text(String),
}

impl FieldValue {
    fn from_raw(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if is_integer_literal(trimmed) {
            if let Ok(value) = trimmed.parse::<i64>() {
                return Some(FieldValue::Int(value));
            }
        }
        Some(FieldValue::Text(trimmed.to_string()))
    }
}

fn is_integer_literal(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// One extracted record: an ordered map from field name to scalar.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Field lookup, exact match first, then ASCII case-insensitive — the
    /// service is not consistent about field-name casing across endpoints.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        if let Some(value) = self.fields.get(name) {
            return Some(value);
        }
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Scans `payload` for repeated `<tag>…</tag>` blocks (tag match is ASCII
/// case-insensitive) and decodes every inner `<NAME>value</NAME>` pair.
/// Partial or malformed blocks are skipped, never raised.
pub fn extract_records(payload: &str, tag: &str) -> Vec<RawRecord> {
    let bytes = payload.as_bytes();
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let mut records = Vec::new();
    let mut cursor = 0;

    while let Some(start) = find_ci(bytes, open.as_bytes(), cursor) {
        let content_start = start + open.len();
        let Some(end) = find_ci(bytes, close.as_bytes(), content_start) else {
            break;
        };
        let record = extract_fields(&payload[content_start..end]);
        if !record.is_empty() {
            records.push(record);
        }
        cursor = end + close.len();
    }

    records
}

fn extract_fields(block: &str) -> RawRecord {
    let bytes = block.as_bytes();
    let mut record = RawRecord::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let Some(open_at) = find_byte(bytes, b'<', pos) else {
            break;
        };
        let name_start = open_at + 1;
        let Some(name_end) = find_byte(bytes, b'>', name_start) else {
            break;
        };
        let name = &block[name_start..name_end];
        if name.is_empty() || !name.bytes().all(is_name_byte) {
            pos = open_at + 1;
            continue;
        }

        let value_start = name_end + 1;
        let Some(value_end) = find_byte(bytes, b'<', value_start) else {
            break;
        };
        let closing = format!("</{name}>");
        if !matches_at_ci(bytes, closing.as_bytes(), value_end) {
            // Not a flat NAME/value pair; resume scanning at the tag that
            // interrupted it so nested noise cannot hide later fields.
            pos = value_end;
            continue;
        }

        if let Some(value) = FieldValue::from_raw(&block[value_start..value_end]) {
            record.insert(name, value);
        }
        pos = value_end + closing.len();
    }

    record
}

fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn find_byte(haystack: &[u8], needle: u8, from: usize) -> Option<usize> {
    haystack[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|offset| from + offset)
}

fn find_ci(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|offset| from + offset)
}

fn matches_at_ci(haystack: &[u8], needle: &[u8], at: usize) -> bool {
    haystack
        .get(at..at + needle.len())
        .is_some_and(|window| window.eq_ignore_ascii_case(needle))
}

/// Pulls the hexadecimal session token out of an authentication response.
/// The fixed textual pattern is `WSID…>HEX<`; the first occurrence that
/// yields a non-empty hex run wins.
pub fn extract_token(payload: &str) -> Option<String> {
    let bytes = payload.as_bytes();
    let mut cursor = 0;

    while let Some(at) = find_ci(bytes, b"WSID", cursor) {
        cursor = at + 4;
        let Some(gt) = find_byte(bytes, b'>', cursor) else {
            return None;
        };
        let hex_start = gt + 1;
        let hex_end = bytes[hex_start..]
            .iter()
            .position(|b| !b.is_ascii_hexdigit())
            .map(|offset| hex_start + offset)
            .unwrap_or(bytes.len());
        if hex_end > hex_start && bytes.get(hex_end) == Some(&b'<') {
            return Some(payload[hex_start..hex_end].to_string());
        }
    }

    None
}
