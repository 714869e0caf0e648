//! Order extractor — structured data from purchase-order emails.
//!
//! Line items are parsed per line: a SKU pattern anchors the item, then
//! quantity and price patterns fill it in. An email without an order number
//! yields `None`.

use chrono::{DateTime, TimeZone, Utc};
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::extract::parse_decimal;

/// Order urgency derived from keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// One line of an extracted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub sku: String,
    /// The source line the item was parsed from.
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// `quantity × unit_price`.
    pub total: Decimal,
}

/// Extracted order fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedOrder {
    pub order_number: String,
    pub order_date: DateTime<Utc>,
    pub customer_name: String,
    pub customer_email: String,
    pub line_items: Vec<OrderLineItem>,
    /// Sum of line totals.
    pub subtotal: Decimal,
    pub total_amount: Decimal,
    pub delivery_date: Option<DateTime<Utc>>,
    pub priority: OrderPriority,
    /// Extraction certainty in [0, 1].
    pub confidence: f32,
    /// Human-readable caveats collected during extraction.
    pub extraction_notes: Vec<String>,
}

/// Keywords that each add 0.1 to the extraction confidence.
const CONFIDENCE_KEYWORDS: [&str; 6] = ["po", "order", "sku", "qty", "quantity", "purchase"];

/// Regex cascade for order fields.
pub struct OrderExtractor {
    number_patterns: Vec<Regex>,
    sku_patterns: Vec<Regex>,
    quantity_patterns: Vec<Regex>,
    price_patterns: Vec<Regex>,
    delivery_patterns: Vec<Regex>,
}

impl OrderExtractor {
    pub fn new() -> Self {
        Self {
            number_patterns: compile(&[
                r"(?:po|order)\s*(?:no\.?|number|id|[#№])?\s*[:=]?\s*([A-Za-z0-9][A-Za-z0-9\-]+)",
                r"PO[:\s\-]*([0-9][0-9\-]*)",
            ]),
            sku_patterns: compile(&[
                r"sku\s*[:=]?\s*([A-Za-z0-9\-]+)",
                r"(?:code|item)\s*[:=]\s*([A-Za-z0-9\-]+)",
                r"(?:article|product)\s*[:=]\s*([A-Za-z0-9\-]+)",
            ]),
            quantity_patterns: compile(&[
                r"(?:qty|quantity)\s*[:=]?\s*(\d+)",
                r"(?:units|pcs)\s*[:=]\s*(\d+)",
            ]),
            price_patterns: compile(&[
                r"(?:price|cost)\s*[:=]?\s*[$€£₽]?\s*([0-9]+(?:[\s.,][0-9]+)*)",
            ]),
            delivery_patterns: compile(&[
                r"(?:delivery|deliver by|ship by)\s*[:=]?\s*(\d{1,2}[./\-]\d{1,2}[./\-]\d{4})",
            ]),
        }
    }

    /// Extract order data from an email.
    ///
    /// Returns `None` when no order number is found.
    pub fn extract(
        &self,
        subject: &str,
        body: &str,
        from_email: &str,
        from_name: Option<&str>,
    ) -> Option<ExtractedOrder> {
        let text = format!("{subject}\n{body}");

        let Some(order_number) = self.extract_number(&text) else {
            debug!("No order number found");
            return None;
        };

        let line_items = self.extract_line_items(&text);
        let subtotal: Decimal = line_items.iter().map(|i| i.total).sum();

        let extracted = ExtractedOrder {
            order_number,
            order_date: Utc::now(),
            customer_name: from_name.unwrap_or(from_email).to_string(),
            customer_email: from_email.to_string(),
            subtotal,
            total_amount: subtotal,
            delivery_date: self.extract_delivery_date(&text),
            priority: extract_priority(&text),
            confidence: calculate_confidence(&text),
            extraction_notes: collect_notes(&line_items),
            line_items,
        };

        info!(
            order_number = %extracted.order_number,
            customer = %extracted.customer_email,
            items = extracted.line_items.len(),
            subtotal = %extracted.subtotal,
            "Extracted order"
        );

        Some(extracted)
    }

    fn extract_number(&self, text: &str) -> Option<String> {
        for pattern in &self.number_patterns {
            if let Some(cap) = pattern.captures(text) {
                return Some(cap.get(1)?.as_str().trim().to_string());
            }
        }
        None
    }

    /// Scan line by line; a SKU match anchors an item, quantity defaults to
    /// 1 and price to 0 when absent from the same line.
    ///
    /// Public because the action executor parses items from emails that
    /// carry no order number.
    pub fn extract_line_items(&self, text: &str) -> Vec<OrderLineItem> {
        let mut items: Vec<OrderLineItem> = Vec::new();

        for line in text.lines() {
            let Some(sku) = self
                .sku_patterns
                .iter()
                .find_map(|p| p.captures(line))
                .and_then(|cap| cap.get(1).map(|m| m.as_str().trim().to_string()))
            else {
                continue;
            };

            if items.iter().any(|i| i.sku == sku) {
                continue;
            }

            let quantity = self
                .quantity_patterns
                .iter()
                .find_map(|p| p.captures(line))
                .and_then(|cap| cap.get(1)?.as_str().parse::<u32>().ok())
                .unwrap_or(1);

            let unit_price = self
                .price_patterns
                .iter()
                .find_map(|p| p.captures(line))
                .and_then(|cap| parse_decimal(cap.get(1)?.as_str().trim()))
                .unwrap_or(Decimal::ZERO);

            items.push(OrderLineItem {
                sku,
                description: line.trim().to_string(),
                quantity,
                unit_price,
                total: Decimal::from(quantity) * unit_price,
            });
        }

        items
    }

    fn extract_delivery_date(&self, text: &str) -> Option<DateTime<Utc>> {
        for pattern in &self.delivery_patterns {
            if let Some(cap) = pattern.captures(text) {
                let raw = cap.get(1)?.as_str();
                let parts: Vec<u32> = raw
                    .split(['.', '/', '-'])
                    .filter_map(|p| p.parse().ok())
                    .collect();
                if let [day, month, year] = parts[..]
                    && let chrono::LocalResult::Single(dt) =
                        Utc.with_ymd_and_hms(year as i32, month, day, 0, 0, 0)
                {
                    return Some(dt);
                }
            }
        }
        None
    }
}

impl Default for OrderExtractor {
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

fn extract_priority(text: &str) -> OrderPriority {
    let lower = text.to_lowercase();
    if ["urgent", "asap", "rush"].iter().any(|w| lower.contains(w)) {
        OrderPriority::Urgent
    } else if lower.contains("high priority") || lower.contains("important") {
        OrderPriority::High
    } else if lower.contains("low priority") || lower.contains("when possible") {
        OrderPriority::Low
    } else {
        OrderPriority::Normal
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

fn collect_notes(items: &[OrderLineItem]) -> Vec<String> {
    let mut notes = Vec::new();
    if items.is_empty() {
        notes.push("No line items extracted - verify manually".to_string());
    }
    for item in items {
        if item.unit_price == Decimal::ZERO {
            notes.push(format!("SKU {} has no price - verify", item.sku));
        }
    }
    notes
}
