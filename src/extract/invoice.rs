//! Invoice extractor — structured data from invoice emails.
//!
//! Ordered pattern cascade, first match per field wins. An email without an
//! invoice number or a total amount yields `None` — the caller decides
//! whether to abandon the action.

use chrono::{DateTime, Duration, TimeZone, Utc};
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::extract::parse_decimal;

/// Supported currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Rub,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Rub => "RUB",
        }
    }
}

/// Detected payment terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTerms {
    Immediate,
    Net10,
    Net30,
    Net60,
    Net90,
}

impl PaymentTerms {
    /// Days until the invoice is due.
    pub fn days(&self) -> i64 {
        match self {
            Self::Immediate => 0,
            Self::Net10 => 10,
            Self::Net30 => 30,
            Self::Net60 => 60,
            Self::Net90 => 90,
        }
    }
}

/// Extracted invoice fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    pub invoice_number: String,
    pub invoice_date: DateTime<Utc>,
    pub vendor_name: String,
    pub vendor_email: String,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    /// VAT rate as a whole percentage.
    pub vat_rate: u32,
    pub total_amount: Decimal,
    pub currency: Currency,
    pub payment_terms: PaymentTerms,
    pub due_date: DateTime<Utc>,
    pub description: String,
    /// Extraction certainty in [0, 1].
    pub confidence: f32,
    /// Human-readable caveats collected during extraction.
    pub extraction_notes: Vec<String>,
}

/// Default VAT rate when none is detected.
const DEFAULT_VAT_RATE: u32 = 20;

/// Keywords that each add 0.1 to the extraction confidence.
const CONFIDENCE_KEYWORDS: [&str; 5] = ["invoice", "vat", "payment", "bill", "due"];

/// Regex cascade for invoice fields.
pub struct InvoiceExtractor {
    number_patterns: Vec<Regex>,
    amount_patterns: Vec<Regex>,
    vat_patterns: Vec<Regex>,
    date_patterns: Vec<Regex>,
}

impl InvoiceExtractor {
    pub fn new() -> Self {
        Self {
            number_patterns: compile(&[
                r"(?:invoice|inv)\s*(?:no\.?|number|[#№])?\s*:?\s*([A-Za-z0-9][A-Za-z0-9\-]+)",
                r"INV[:\s\-]*([0-9][0-9\-]*)",
            ]),
            amount_patterns: compile(&[
                r"(?:total\s+amount|amount\s+due|total|amount|sum)\s*:?\s*[$€£₽]?\s*([0-9][0-9\s,.]*[.,][0-9]{2})",
                r"([0-9][0-9\s,.]*[.,][0-9]{2})\s*(?:USD|EUR|GBP|RUB|[$€£₽])",
                r"[$€£₽]\s*([0-9][0-9\s,.]*[.,][0-9]{2})",
            ]),
            vat_patterns: compile(&[r"(?:vat|tax)\s*[:(]?\s*(\d{1,2})\s*%"]),
            date_patterns: compile(&[
                // DD.MM.YYYY / DD-MM-YYYY / DD/MM/YYYY
                r"(\d{1,2})[./\-](\d{1,2})[./\-](\d{4})",
                // YYYY-MM-DD
                r"(\d{4})[./\-](\d{1,2})[./\-](\d{1,2})",
            ]),
        }
    }

    /// Extract invoice data from an email.
    ///
    /// Returns `None` when no invoice number or no amount is found.
    pub fn extract(
        &self,
        subject: &str,
        body: &str,
        from_email: &str,
        from_name: Option<&str>,
    ) -> Option<ExtractedInvoice> {
        let text = format!("{subject}\n{body}");

        let Some(invoice_number) = self.extract_number(&text) else {
            debug!("No invoice number found");
            return None;
        };

        let invoice_date = self.extract_date(&text).unwrap_or_else(Utc::now);

        let Some(total_amount) = self.extract_amount(&text) else {
            debug!(invoice_number, "No amount found");
            return None;
        };

        let vat_rate = self.extract_vat_rate(&text);
        let vat_amount = calculate_vat(total_amount, vat_rate);
        let payment_terms = extract_payment_terms(&text);
        let due_date = invoice_date + Duration::days(payment_terms.days());
        let currency = extract_currency(&text);

        let extracted = ExtractedInvoice {
            invoice_number,
            invoice_date,
            vendor_name: from_name.unwrap_or(from_email).to_string(),
            vendor_email: from_email.to_string(),
            subtotal: total_amount - vat_amount,
            vat_amount,
            vat_rate,
            total_amount,
            currency,
            payment_terms,
            due_date,
            description: subject.to_string(),
            confidence: calculate_confidence(&text),
            extraction_notes: collect_notes(&text),
        };

        info!(
            invoice_number = %extracted.invoice_number,
            vendor = %extracted.vendor_email,
            amount = %extracted.total_amount,
            currency = extracted.currency.as_str(),
            "Extracted invoice"
        );

        Some(extracted)
    }

    fn extract_number(&self, text: &str) -> Option<String> {
        for pattern in &self.number_patterns {
            if let Some(cap) = pattern.captures(text) {
                let number = cap.get(1)?.as_str();
                // First line only, collapsed whitespace.
                let number = number.split('\n').next()?.trim();
                return Some(number.to_string());
            }
        }
        None
    }

    fn extract_amount(&self, text: &str) -> Option<Decimal> {
        for pattern in &self.amount_patterns {
            if let Some(cap) = pattern.captures(text)
                && let Some(amount) = cap.get(1).and_then(|m| parse_decimal(m.as_str()))
            {
                return Some(amount);
            }
        }
        None
    }

    fn extract_vat_rate(&self, text: &str) -> u32 {
        for pattern in &self.vat_patterns {
            if let Some(cap) = pattern.captures(text)
                && let Some(rate) = cap.get(1).and_then(|m| m.as_str().parse::<u32>().ok())
                && rate <= 100
            {
                return rate;
            }
        }
        DEFAULT_VAT_RATE
    }

    fn extract_date(&self, text: &str) -> Option<DateTime<Utc>> {
        for (i, pattern) in self.date_patterns.iter().enumerate() {
            for cap in pattern.captures_iter(text) {
                let (a, b, c) = (
                    cap.get(1)?.as_str().parse::<u32>().ok()?,
                    cap.get(2)?.as_str().parse::<u32>().ok()?,
                    cap.get(3)?.as_str().parse::<u32>().ok()?,
                );
                // Pattern 0 is day-first, pattern 1 is year-first.
                let (year, month, day) = if i == 0 { (c, b, a) } else { (a, b, c) };
                if let chrono::LocalResult::Single(dt) =
                    Utc.with_ymd_and_hms(year as i32, month, day, 0, 0, 0)
                {
                    return Some(dt);
                }
            }
        }
        None
    }
}

impl Default for InvoiceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .expect("invalid built-in pattern")
        })
        .collect()
}

/// VAT portion of a gross amount: `amount × rate / (100 + rate)`.
fn calculate_vat(amount: Decimal, vat_rate: u32) -> Decimal {
    amount * Decimal::from(vat_rate) / Decimal::from(100 + vat_rate)
}

fn extract_payment_terms(text: &str) -> PaymentTerms {
    let lower = text.to_lowercase();
    let table: [(&str, PaymentTerms); 7] = [
        ("immediately", PaymentTerms::Immediate),
        ("due on receipt", PaymentTerms::Immediate),
        ("net 10", PaymentTerms::Net10),
        ("net 30", PaymentTerms::Net30),
        ("net 60", PaymentTerms::Net60),
        ("net 90", PaymentTerms::Net90),
        ("net-30", PaymentTerms::Net30),
    ];
    for (keyword, terms) in table {
        if lower.contains(keyword) {
            return terms;
        }
    }
    PaymentTerms::Net30
}

fn extract_currency(text: &str) -> Currency {
    let lower = text.to_lowercase();
    if lower.contains('€') || lower.contains("eur") {
        Currency::Eur
    } else if lower.contains('£') || lower.contains("gbp") {
        Currency::Gbp
    } else if lower.contains('₽') || lower.contains("rub") {
        Currency::Rub
    } else {
        Currency::Usd
    }
}

fn calculate_confidence(text: &str) -> f32 {
    let lower = text.to_lowercase();
    let mut confidence: f32 = 0.5;
    for keyword in CONFIDENCE_KEYWORDS {
        if lower.contains(keyword) {
            confidence += 0.1;
        }
    }
    confidence.min(1.0)
}

fn collect_notes(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut notes = Vec::new();

    if text.len() < 100 {
        notes.push("Short email text - extraction may be inaccurate".to_string());
    }
    if lower.contains("draft") || lower.contains("sample") {
        notes.push("Email mentions draft/sample - verify before processing".to_string());
    }
    if lower.contains("no invoice") {
        notes.push("Email explicitly states no invoice".to_string());
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn extractor() -> InvoiceExtractor {
        InvoiceExtractor::new()
    }

    #[test]
    fn extracts_english_invoice() {
        let extracted = extractor()
            .extract(
                "Invoice INV-2024-0001",
                "Invoice Date: 15.12.2024\n\nTotal: $5,000.00\nVAT (20%)\nPayment Terms: Net 60",
                "vendor@example.com",
                None,
            )
            .unwrap();

        assert_eq!(extracted.invoice_number, "INV-2024-0001");
        assert_eq!(extracted.total_amount, dec!(5000.00));
        assert_eq!(extracted.currency, Currency::Usd);
        assert_eq!(extracted.payment_terms, PaymentTerms::Net60);
        assert_eq!(extracted.vat_rate, 20);
        assert_eq!(extracted.vendor_email, "vendor@example.com");
    }

    #[test]
    fn no_invoice_number_returns_none() {
        assert!(extractor()
            .extract(
                "Random email",
                "This is just a regular email with no identifying data",
                "test@example.com",
                None,
            )
            .is_none());
    }

    #[test]
    fn no_amount_returns_none() {
        assert!(extractor()
            .extract(
                "Invoice INV-123",
                "Please find the invoice attached.",
                "test@example.com",
                None,
            )
            .is_none());
    }

    #[test]
    fn vat_computed_from_gross_amount() {
        let extracted = extractor()
            .extract(
                "Invoice INV-VAT-001",
                "Total: 11800.00 USD\nVAT (18%)",
                "vendor@example.com",
                None,
            )
            .unwrap();

        assert_eq!(extracted.vat_rate, 18);
        let expected = dec!(11800.00) * dec!(18) / dec!(118);
        assert!((extracted.vat_amount - expected).abs() < dec!(0.01));
        assert_eq!(
            extracted.subtotal,
            extracted.total_amount - extracted.vat_amount
        );
    }

    #[test]
    fn due_date_follows_payment_terms() {
        let cases = [
            ("Payment due immediately", 0),
            ("Payment Terms: Net 10", 10),
            ("Payment Terms: Net 30", 30),
            ("Payment Terms: Net 60", 60),
            ("Payment Terms: Net 90", 90),
            ("No terms mentioned here", 30),
        ];
        for (terms_text, expected_days) in cases {
            let body = format!("Invoice Date: 01.12.2024\nTotal: 1000.00 USD\n{terms_text}");
            let extracted = extractor()
                .extract("Invoice INV-DUE-001", &body, "vendor@example.com", None)
                .unwrap();
            let days = (extracted.due_date - extracted.invoice_date).num_days();
            assert_eq!(days, expected_days, "terms: {terms_text}");
        }
    }

    #[test]
    fn comma_grouped_amount_parses() {
        let extracted = extractor()
            .extract(
                "Invoice INV-123456 - Payment Due",
                "Total amount: $1,234.56",
                "billing@vendor.com",
                None,
            )
            .unwrap();
        assert_eq!(extracted.total_amount, dec!(1234.56));
    }

    #[test]
    fn comma_decimal_amount_parses() {
        let extracted = extractor()
            .extract(
                "Invoice INV-77",
                "Total: 1234,56 EUR",
                "vendor@example.eu",
                None,
            )
            .unwrap();
        assert_eq!(extracted.total_amount, dec!(1234.56));
        assert_eq!(extracted.currency, Currency::Eur);
    }

    #[test]
    fn currency_detection() {
        let cases = [
            ("Total: $100.00", Currency::Usd),
            ("Total: €100.00", Currency::Eur),
            ("Total: £100.00", Currency::Gbp),
            ("Total: 100.00 RUB", Currency::Rub),
            ("Total: 100.00", Currency::Usd),
        ];
        for (body, expected) in cases {
            let extracted = extractor()
                .extract("Invoice INV-CUR", body, "vendor@example.com", None)
                .unwrap();
            assert_eq!(extracted.currency, expected, "body: {body}");
        }
    }

    #[test]
    fn confidence_grows_with_keywords() {
        let extracted = extractor()
            .extract(
                "Invoice INV-123",
                "Total: 1000.00 USD\nVAT: 18%\npayment due on the bill",
                "test@example.com",
                None,
            )
            .unwrap();
        assert!(extracted.confidence >= 0.5);
        assert!(extracted.confidence <= 1.0);
        // invoice + vat + payment + bill + due all present → capped climb
        assert!((extracted.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn draft_mention_collects_note() {
        let extracted = extractor()
            .extract(
                "Draft Invoice INV-DRAFT-001",
                "Total: 1000.00 USD",
                "vendor@example.com",
                None,
            )
            .unwrap();
        assert!(extracted
            .extraction_notes
            .iter()
            .any(|n| n.to_lowercase().contains("draft")));
    }

    #[test]
    fn vendor_name_falls_back_to_email() {
        let with_name = extractor()
            .extract(
                "Invoice INV-1",
                "Total: 10.00 USD",
                "vendor@example.com",
                Some("Acme Supplies"),
            )
            .unwrap();
        assert_eq!(with_name.vendor_name, "Acme Supplies");

        let without = extractor()
            .extract("Invoice INV-1", "Total: 10.00 USD", "vendor@example.com", None)
            .unwrap();
        assert_eq!(without.vendor_name, "vendor@example.com");
    }

    #[test]
    fn iso_date_parses() {
        let extracted = extractor()
            .extract(
                "Invoice INV-ISO",
                "Date: 2024-12-15\nTotal: 100.00 USD",
                "vendor@example.com",
                None,
            )
            .unwrap();
        assert_eq!(
            extracted.invoice_date,
            Utc.with_ymd_and_hms(2024, 12, 15, 0, 0, 0).unwrap()
        );
    }
}
