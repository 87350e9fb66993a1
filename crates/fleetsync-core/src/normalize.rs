//! Bridges the loosely-typed extracted fields to the destination schema's
//! expectations. Every function here is total: no input raises, the worst
//! case is `None`. Source records routinely omit fields or carry
//! non-conforming values, and one malformed record must never abort a batch.

use fleetsync_soap::{FieldValue, RawRecord};

/// Trimmed, bounded text. `None`, empty and whitespace-only values collapse
/// to `None`; truncation is character-safe.
pub fn text(value: Option<&FieldValue>, max_len: Option<usize>) -> Option<String> {
    let raw = match value {
        Some(FieldValue::Text(text)) => text.trim().to_string(),
        Some(FieldValue::Int(int)) => int.to_string(),
        None => return None,
    };
    if raw.is_empty() {
        return None;
    }
    match max_len {
        Some(max) if raw.chars().count() > max => Some(raw.chars().take(max).collect()),
        _ => Some(raw),
    }
}

/// Base-10 integer. Already-integer values pass through verbatim; text is
/// trimmed and parsed; anything else is `None`.
pub fn int(value: Option<&FieldValue>) -> Option<i64> {
    match value {
        Some(FieldValue::Int(int)) => Some(*int),
        Some(FieldValue::Text(text)) => text.trim().parse::<i64>().ok(),
        None => None,
    }
}

/// Decimal for monetary fields. The source locale writes a decimal comma, so
/// the comma is normalized to a point before parsing.
pub fn decimal(value: Option<&FieldValue>) -> Option<f64> {
    match value {
        Some(FieldValue::Int(int)) => Some(*int as f64),
        Some(FieldValue::Text(text)) => text.trim().replace(',', ".").parse::<f64>().ok(),
        None => None,
    }
}

/// Merge-key extraction: a non-null, positive integer, or `None`. Records
/// without a resolvable key are dropped by the caller, never written with a
/// placeholder.
pub fn positive_key(record: &RawRecord, field: &str) -> Option<i64> {
    int(record.get(field)).filter(|key| *key > 0)
}

#[cfg(test)]
mod tests {
    use fleetsync_soap::extract_records;

    use super::*;

    fn record(payload: &str) -> RawRecord {
        extract_records(payload, "row")
            .into_iter()
            .next()
            .expect("fixture should contain one record")
    }

    #[test]
    fn text_trims_collapses_and_truncates() {
        let rec = record("<row><A>  hello world  </A><B>12</B></row>");
        assert_eq!(text(rec.get("A"), None), Some("hello world".to_string()));
        assert_eq!(text(rec.get("A"), Some(5)), Some("hello".to_string()));
        assert_eq!(text(rec.get("B"), Some(10)), Some("12".to_string()));
        assert_eq!(text(rec.get("MISSING"), Some(10)), None);
    }

    #[test]
    fn text_truncation_is_character_safe() {
        let value = FieldValue::Text("héllo".to_string());
        assert_eq!(text(Some(&value), Some(2)), Some("hé".to_string()));
    }

    #[test]
    fn int_accepts_integers_and_numeric_text_only() {
        assert_eq!(int(Some(&FieldValue::Int(42))), Some(42));
        assert_eq!(int(Some(&FieldValue::Text(" -7 ".into()))), Some(-7));
        assert_eq!(int(Some(&FieldValue::Text("12a".into()))), None);
        assert_eq!(int(Some(&FieldValue::Text(String::new()))), None);
        assert_eq!(int(None), None);
    }

    #[test]
    fn decimal_normalizes_the_decimal_comma() {
        assert_eq!(decimal(Some(&FieldValue::Text("1234,56".into()))), Some(1234.56));
        assert_eq!(decimal(Some(&FieldValue::Text("789.01".into()))), Some(789.01));
        assert_eq!(decimal(Some(&FieldValue::Int(5))), Some(5.0));
        assert_eq!(decimal(Some(&FieldValue::Text("n/a".into()))), None);
        assert_eq!(decimal(None), None);
    }

    #[test]
    fn positive_key_rejects_missing_zero_and_negative() {
        let rec = record("<row><OK>501</OK><ZERO>0</ZERO><NEG>-3</NEG><TXT>abc</TXT></row>");
        assert_eq!(positive_key(&rec, "OK"), Some(501));
        assert_eq!(positive_key(&rec, "ZERO"), None);
        assert_eq!(positive_key(&rec, "NEG"), None);
        assert_eq!(positive_key(&rec, "TXT"), None);
        assert_eq!(positive_key(&rec, "ABSENT"), None);
    }
}
