//! In-process ERP stub — development and test double with the production
//! validation behavior.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::erp::{
    ErpClient, ErpInvoice, ErpOrder, ErpTicket, InvoiceStatus, OrderItem, OrderStatus,
    TicketStatus,
};
use crate::error::ErpError;

/// Stub ERP client. Validates input like the real API and fabricates
/// entities with sequential document numbers.
#[derive(Default)]
pub struct StubErpClient {
    order_counter: AtomicU32,
    ticket_counter: AtomicU32,
}

impl StubErpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ErpClient for StubErpClient {
    async fn create_order(
        &self,
        customer_id: Uuid,
        items: Vec<OrderItem>,
        source: &str,
        source_email_id: Option<&str>,
    ) -> Result<ErpOrder, ErpError> {
        if items.is_empty() {
            return Err(ErpError::Validation(
                "Order must have at least one item".to_string(),
            ));
        }

        let seq = self.order_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let number = format!("ORD-{seq:06}");

        let mut total_amount = Decimal::ZERO;
        for item in &items {
            if let Some(price) = item.unit_price {
                total_amount += item.quantity * price;
            }
        }

        let order = ErpOrder {
            id: Uuid::new_v4(),
            number: number.clone(),
            status: OrderStatus::Draft,
            customer_id,
            total_amount: (total_amount > Decimal::ZERO).then_some(total_amount),
            source: source.to_string(),
            source_email_id: source_email_id.map(String::from),
            items,
        };

        info!(
            order_number = %number,
            customer_id = %customer_id,
            items = order.items.len(),
            "Order created in ERP (stub)"
        );
        Ok(order)
    }

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        status: &str,
        notes: &str,
    ) -> Result<ErpInvoice, ErpError> {
        let Some(status) = InvoiceStatus::from_str(status) else {
            return Err(ErpError::Validation(format!(
                "Invalid invoice status: {status}"
            )));
        };

        let number = format!("INV-{}", invoice_id.simple().to_string()[..8].to_uppercase());
        let invoice = ErpInvoice {
            id: invoice_id,
            number: number.clone(),
            status,
            amount: Decimal::new(10_000_00, 2),
            customer_id: Uuid::new_v4(),
            notes: notes.to_string(),
            updated_at: Utc::now(),
        };

        info!(
            invoice_number = %number,
            status = status.as_str(),
            "Invoice updated in ERP (stub)"
        );
        Ok(invoice)
    }

    async fn create_ticket(
        &self,
        subject: &str,
        description: &str,
        customer_id: Uuid,
        priority: u8,
        source_email_id: Option<&str>,
    ) -> Result<ErpTicket, ErpError> {
        if subject.is_empty() {
            return Err(ErpError::Validation(
                "Ticket subject cannot be empty".to_string(),
            ));
        }

        let seq = self.ticket_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let number = format!("TKT-{seq:06}");

        let ticket = ErpTicket {
            id: Uuid::new_v4(),
            number: number.clone(),
            subject: subject.to_string(),
            description: description.chars().take(1000).collect(),
            status: TicketStatus::Open,
            customer_id,
            priority: priority.clamp(1, 4),
            source_email_id: source_email_id.map(String::from),
            created_at: Utc::now(),
        };

        info!(
            ticket_number = %number,
            priority = ticket.priority,
            "Ticket created in ERP (stub)"
        );
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(sku: &str, qty: u32, price: Option<Decimal>) -> OrderItem {
        OrderItem {
            sku: sku.into(),
            description: String::new(),
            quantity: Decimal::from(qty),
            unit_price: price,
        }
    }

    #[tokio::test]
    async fn create_order_computes_total() {
        let erp = StubErpClient::new();
        let order = erp
            .create_order(
                Uuid::new_v4(),
                vec![
                    item("A-1", 2, Some(dec!(10.00))),
                    item("B-2", 1, Some(dec!(5.50))),
                ],
                "email",
                Some("msg-1"),
            )
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Draft);
        assert_eq!(order.total_amount, Some(dec!(25.50)));
        assert_eq!(order.source, "email");
        assert_eq!(order.source_email_id.as_deref(), Some("msg-1"));
        assert!(order.number.starts_with("ORD-"));
    }

    #[tokio::test]
    async fn create_order_empty_items_is_validation_error() {
        let erp = StubErpClient::new();
        let err = erp
            .create_order(Uuid::new_v4(), vec![], "email", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ErpError::Validation(ref msg) if msg == "Order must have at least one item"
        ));
    }

    #[tokio::test]
    async fn order_numbers_are_sequential() {
        let erp = StubErpClient::new();
        let a = erp
            .create_order(Uuid::new_v4(), vec![item("X", 1, None)], "email", None)
            .await
            .unwrap();
        let b = erp
            .create_order(Uuid::new_v4(), vec![item("Y", 1, None)], "email", None)
            .await
            .unwrap();
        assert_eq!(a.number, "ORD-000001");
        assert_eq!(b.number, "ORD-000002");
        // No priced items → no total.
        assert!(a.total_amount.is_none());
    }

    #[tokio::test]
    async fn update_invoice_validates_status() {
        let erp = StubErpClient::new();
        let id = Uuid::new_v4();

        let invoice = erp.update_invoice(id, "paid", "payment confirmed").await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_eq!(invoice.id, id);
        assert_eq!(invoice.notes, "payment confirmed");

        let err = erp.update_invoice(id, "definitely-paid", "").await.unwrap_err();
        assert!(matches!(err, ErpError::Validation(ref msg) if msg.contains("definitely-paid")));
    }

    #[tokio::test]
    async fn create_ticket_validates_subject() {
        let erp = StubErpClient::new();
        let err = erp
            .create_ticket("", "something broke", Uuid::new_v4(), 2, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ErpError::Validation(_)));
    }

    #[tokio::test]
    async fn create_ticket_clamps_priority_and_truncates() {
        let erp = StubErpClient::new();
        let long_description = "x".repeat(2000);
        let ticket = erp
            .create_ticket("Broken", &long_description, Uuid::new_v4(), 9, None)
            .await
            .unwrap();
        assert_eq!(ticket.priority, 4);
        assert_eq!(ticket.description.len(), 1000);
        assert_eq!(ticket.status, TicketStatus::Open);
    }
}
