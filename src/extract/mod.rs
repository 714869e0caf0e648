//! Field extraction — regex cascades turning free email text into
//! structured invoice/order payloads for action execution.

pub mod invoice;
pub mod order;

pub use invoice::{Currency, ExtractedInvoice, InvoiceExtractor, PaymentTerms};
pub use order::{ExtractedOrder, OrderExtractor, OrderLineItem, OrderPriority};

use rust_decimal::Decimal;

/// Parse a numeric string that may use comma or point decimals and
/// space/comma grouping. The separator that occurs last is the decimal
/// point; the other is grouping.
pub(crate) fn parse_decimal(raw: &str) -> Option<Decimal> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return None;
    }

    let normalized = match (s.rfind('.'), s.rfind(',')) {
        (Some(dot), Some(comma)) => {
            if dot > comma {
                s.replace(',', "")
            } else {
                s.replace('.', "").replace(',', ".")
            }
        }
        (None, Some(_)) => s.replace(',', "."),
        _ => s,
    };

    normalized.parse().ok()
}
