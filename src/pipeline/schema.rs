//! Response validation: raw model answer → [`InvoiceFields`].
//!
//! The model is told to return a bare JSON object with four string fields.
//! In practice answers arrive wrapped in Markdown fences, with a sentence of
//! preamble, with numbers instead of strings, with `"vat"` instead of
//! `"VAT"`, or with a date in whatever format the invoice used. This module
//! accepts those variations and rejects everything else with a
//! [`DocumentError::NormalizationParse`], which is distinct from a service
//! failure so callers can tell "the model misbehaved" from "the network
//! failed".
//!
//! ## Steps
//!
//! 1. Strip outer code fences
//! 2. Isolate the outermost `{ ... }`
//! 3. Parse as JSON; the top level must be an object
//! 4. Read each field (exact key, then case-insensitive); strings and
//!    numbers are accepted, anything else is a contract violation
//! 5. Apply the missing-field policy to absent or `null` fields
//! 6. Canonicalise: Date → `YYYY-MM-DD`, Total/VAT → no currency marks

use crate::config::{DateOrder, MissingFieldPolicy};
use crate::error::DocumentError;
use crate::output::InvoiceFields;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Parse and validate one model answer.
pub fn parse_response(
    raw: &str,
    date_order: DateOrder,
    missing: MissingFieldPolicy,
) -> Result<InvoiceFields, DocumentError> {
    let unfenced = strip_code_fences(raw);
    let json = isolate_object(&unfenced)
        .ok_or_else(|| DocumentError::parse("response contains no JSON object", raw))?;

    let value: Value = serde_json::from_str(json)
        .map_err(|e| DocumentError::parse(format!("invalid JSON: {e}"), raw))?;
    let obj = value
        .as_object()
        .ok_or_else(|| DocumentError::parse("top-level value is not an object", raw))?;

    let supplier = read_field(obj, "Supplier", missing, raw)?;
    let date = read_field(obj, "Date", missing, raw)?;
    let total = read_field(obj, "Total", missing, raw)?;
    let vat = read_field(obj, "VAT", missing, raw)?;

    Ok(InvoiceFields {
        supplier: supplier.split_whitespace().collect::<Vec<_>>().join(" "),
        date: canonical_date(&date, date_order),
        total: strip_currency(&total),
        vat: strip_currency(&vat),
    })
}

// ── Steps 1–2: Fences and object isolation ──────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n?(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

fn isolate_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let end = input.rfind('}')?;
    (end > start).then(|| &input[start..=end])
}

// ── Steps 4–5: Field access ─────────────────────────────────────────────────

fn read_field(
    obj: &Map<String, Value>,
    key: &str,
    missing: MissingFieldPolicy,
    raw: &str,
) -> Result<String, DocumentError> {
    let value = obj.get(key).or_else(|| {
        obj.iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    });

    match value {
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Null) | None => match missing {
            MissingFieldPolicy::Substitute => {
                debug!("Field '{}' missing from response, using empty string", key);
                Ok(String::new())
            }
            MissingFieldPolicy::Reject => Err(DocumentError::parse(
                format!("required field '{key}' is missing"),
                raw,
            )),
        },
        Some(other) => Err(DocumentError::parse(
            format!("field '{key}' must be a string, got {}", json_type(other)),
            raw,
        )),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Step 6: Canonicalisation ────────────────────────────────────────────────

const UNAMBIGUOUS_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y",
    "%B %d %Y", "%b %d %Y", "%d-%b-%Y",
];

const DAY_FIRST_FORMATS: &[&str] = &[
    "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y", "%d-%m-%y", "%d.%m.%y",
];

const MONTH_FIRST_FORMATS: &[&str] = &[
    "%m/%d/%Y", "%m-%d-%Y", "%m.%d.%Y", "%m/%d/%y", "%m-%d-%y", "%m.%d.%y",
];

/// Rewrite a date as `YYYY-MM-DD`, or `""` when it cannot be read.
pub fn canonical_date(input: &str, order: DateOrder) -> String {
    let s = input.trim();
    if s.is_empty() {
        return String::new();
    }

    let ordered = match order {
        DateOrder::DayFirst => DAY_FIRST_FORMATS,
        DateOrder::MonthFirst => MONTH_FIRST_FORMATS,
    };

    let parsed = UNAMBIGUOUS_FORMATS
        .iter()
        .chain(ordered.iter())
        .filter_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        // `%Y` happily reads "24" as year 24; leave two-digit years to `%y`.
        .find(|d| (1900..=2100).contains(&d.year()));

    match parsed {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => {
            warn!("Unrecognised date {:?}; leaving Date empty", s);
            String::new()
        }
    }
}

/// Drop currency symbols, codes and other letters from an amount.
///
/// Digits, `.`, `,`, `'` and a leading minus survive; anything that leaves
/// no digit behind becomes `""`.
pub fn strip_currency(input: &str) -> String {
    let kept: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '\'' | '-'))
        .collect();

    let trimmed = kept.trim_matches(|c| matches!(c, '.' | ',' | '\''));
    if !trimmed.chars().any(|c| c.is_ascii_digit()) {
        return String::new();
    }
    match trimmed.strip_prefix('-') {
        Some(rest) => format!("-{}", rest.trim_start_matches('-')),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<InvoiceFields, DocumentError> {
        parse_response(raw, DateOrder::DayFirst, MissingFieldPolicy::Substitute)
    }

    #[test]
    fn plain_object() {
        let f = parse(r#"{"Supplier":"Acme Corp","Date":"2024-05-12","Total":"500.00","VAT":"50.00"}"#)
            .unwrap();
        assert_eq!(f.supplier, "Acme Corp");
        assert_eq!(f.date, "2024-05-12");
        assert_eq!(f.total, "500.00");
        assert_eq!(f.vat, "50.00");
    }

    #[test]
    fn fenced_with_preamble_and_numbers() {
        let raw = "```json\n{\"supplier\": \"Globex\", \"date\": \"12/05/2024\", \"total\": 1234.5, \"vat\": 0}\n```";
        let f = parse(raw).unwrap();
        assert_eq!(f.supplier, "Globex");
        assert_eq!(f.date, "2024-05-12");
        assert_eq!(f.total, "1234.5");
        assert_eq!(f.vat, "0");

        let f = parse("Here is the data: {\"Supplier\":\"X\",\"Date\":\"\",\"Total\":\"1\",\"VAT\":\"\"}").unwrap();
        assert_eq!(f.supplier, "X");
    }

    #[test]
    fn not_json_is_a_parse_error_with_raw_kept() {
        let err = parse("I could not find an invoice.").unwrap_err();
        match err {
            DocumentError::NormalizationParse { raw_response, .. } => {
                assert_eq!(raw_response, "I could not find an invoice.");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse("{not json}").is_err());
    }

    #[test]
    fn non_scalar_field_is_rejected() {
        let err = parse(r#"{"Supplier":["a","b"],"Date":"","Total":"","VAT":""}"#).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn missing_field_policy() {
        let raw = r#"{"Supplier":"Acme","Date":"2024-01-02","Total":"10"}"#;
        let f = parse(raw).unwrap();
        assert_eq!(f.vat, "");

        let f = parse(r#"{"Supplier":null,"Date":"","Total":"","VAT":""}"#).unwrap();
        assert_eq!(f.supplier, "");

        let err = parse_response(raw, DateOrder::DayFirst, MissingFieldPolicy::Reject).unwrap_err();
        assert!(err.to_string().contains("'VAT'"));
    }

    #[test]
    fn date_order_resolves_ambiguity() {
        assert_eq!(canonical_date("12/05/2024", DateOrder::DayFirst), "2024-05-12");
        assert_eq!(canonical_date("12/05/2024", DateOrder::MonthFirst), "2024-12-05");
        assert_eq!(canonical_date("03.11.23", DateOrder::DayFirst), "2023-11-03");
        assert_eq!(canonical_date("2024-05-12", DateOrder::MonthFirst), "2024-05-12");
        assert_eq!(canonical_date("12 May 2024", DateOrder::MonthFirst), "2024-05-12");
        assert_eq!(canonical_date("March 3, 2024", DateOrder::DayFirst), "2024-03-03");
    }

    #[test]
    fn unreadable_dates_become_empty() {
        assert_eq!(canonical_date("", DateOrder::DayFirst), "");
        assert_eq!(canonical_date("soon", DateOrder::DayFirst), "");
        assert_eq!(canonical_date("31/02/2024", DateOrder::DayFirst), "");
    }

    #[test]
    fn currency_marks_are_removed() {
        assert_eq!(strip_currency("$500.00"), "500.00");
        assert_eq!(strip_currency("€ 1.234,56"), "1.234,56");
        assert_eq!(strip_currency("1,234.56 USD"), "1,234.56");
        assert_eq!(strip_currency("MXN 99"), "99");
        assert_eq!(strip_currency("-12.50 £"), "-12.50");
        assert_eq!(strip_currency("Rs. 450"), "450");
        assert_eq!(strip_currency("N/A"), "");
        assert_eq!(strip_currency(""), "");
    }
}
