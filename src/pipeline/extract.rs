//! Deterministic pre-extraction of Date, Total and VAT.
//!
//! Cheap regex pass over the normalized text. The results are only hints
//! for the language model: they are never written to the table directly.

use crate::output::PreExtractedFields;
use once_cell::sync::Lazy;
use regex::Regex;

/// `d/m/y`-shaped dates with `/`, `.` or `-` separators and 2- or 4-digit years.
static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}\b").unwrap());

/// `total` or `amount due`, then the first number after it.
static TOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:total|amount\s+due)\b[^\d]*(\d(?:[\d.,]*\d)?)").unwrap()
});

/// `vat` or `iva`, then the first number after it.
static VAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:vat|iva)\b[^\d]*(\d(?:[\d.,]*\d)?)").unwrap());

/// Run the three patterns; each field is the first match or `""`.
///
/// Keywords only match as whole words: `Subtotal 90.00` is not read as a
/// total and `private 3` is not read as VAT, even though both contain the
/// keyword as a substring.
pub fn pre_extract(text: &str) -> PreExtractedFields {
    PreExtractedFields {
        date: DATE
            .find(text)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        total: first_group(&TOTAL, text),
        vat: first_group(&VAT, text),
    }
}

fn first_group(re: &Regex, text: &str) -> String {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_all_three_fields() {
        let f = pre_extract("ACME Corp Invoice 12/05/2024 Total: $500.00 VAT: $50.00");
        assert_eq!(f.date, "12/05/2024");
        assert_eq!(f.total, "500.00");
        assert_eq!(f.vat, "50.00");
    }

    #[test]
    fn keeps_thousands_separators() {
        let f = pre_extract("Total: 1,234.56 EUR");
        assert_eq!(f.total, "1,234.56");
    }

    #[test]
    fn trailing_punctuation_is_not_part_of_the_number() {
        let f = pre_extract("Amount due 500.00, thank you");
        assert_eq!(f.total, "500.00");
    }

    #[test]
    fn spanish_keywords_and_dotted_dates() {
        let f = pre_extract("Fecha 03.11.23 Base 100,00 IVA (21%) 21,00 TOTAL 121,00");
        assert_eq!(f.date, "03.11.23");
        assert_eq!(f.vat, "21");
        assert_eq!(f.total, "121,00");
    }

    #[test]
    fn subtotal_does_not_count_as_total() {
        let f = pre_extract("Subtotal 90.00 Total 99.00");
        assert_eq!(f.total, "99.00");
    }

    #[test]
    fn keyword_inside_a_word_is_ignored() {
        let f = pre_extract("private client 3 VAT 7.00");
        assert_eq!(f.vat, "7.00");
        assert_eq!(pre_extract("Subtotal 90.00").total, "");
    }

    #[test]
    fn missing_fields_are_empty() {
        let f = pre_extract("hello world");
        assert_eq!(f, PreExtractedFields::default());
        let f = pre_extract("");
        assert_eq!(f, PreExtractedFields::default());
    }

    #[test]
    fn invalid_dates_still_match_shape() {
        assert_eq!(pre_extract("on 99-99-9999").date, "99-99-9999");
    }
}
