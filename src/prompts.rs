//! Prompts for the semantic normalizer and the vision OCR engine.
//!
//! Every prompt lives here so wording changes touch exactly one place and
//! tests can inspect the text without calling a model.

use crate::config::DateOrder;

/// Output contract for the normalizer. `{date_order}` is filled per batch.
const NORMALIZER_SYSTEM_TEMPLATE: &str = r#"You are an invoice normalization engine.

You receive the text of one invoice and a set of hints found by simple pattern matching. The hints may be wrong or empty; the invoice text is authoritative.

Return ONLY a JSON object with exactly these four string fields and nothing else:
{"Supplier": "...", "Date": "...", "Total": "...", "VAT": "..."}

Rules:
1. Supplier is the company that ISSUED the invoice (the seller), never the customer or recipient.
2. Date is the invoice issue date in YYYY-MM-DD format. Numeric dates in the text are written {date_order}.
3. Total is the final amount payable, including tax.
4. VAT is the tax amount (VAT, IVA, GST), not the rate.
5. Write numbers without currency symbols or currency codes. Keep the decimal separator used on the invoice.
6. Use an empty string for any field you cannot determine. Do not guess.
7. No commentary, no Markdown fences."#;

/// System prompt carrying the output contract and the configured date order.
pub fn normalizer_system_prompt(date_order: DateOrder) -> String {
    NORMALIZER_SYSTEM_TEMPLATE.replace("{date_order}", date_order.describe())
}

/// User message: the (already truncated) invoice text followed by the hints.
pub fn build_user_prompt(invoice_text: &str, hints_json: &str) -> String {
    format!(
        "Invoice text:\n\"\"\"\n{}\n\"\"\"\n\nPre-extracted data:\n{}",
        invoice_text, hints_json
    )
}

/// Instruction for [`crate::pipeline::ocr::VisionOcr`].
pub const VISION_TRANSCRIBE_PROMPT: &str = r#"Transcribe all text visible on this scanned invoice page.

- Output plain text only, line by line in reading order.
- Copy numbers, dates, tax identifiers and currency symbols exactly as printed.
- Do not summarise, translate, correct, or add commentary.
- If the page has no legible text, output nothing."#;
