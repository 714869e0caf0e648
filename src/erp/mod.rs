//! ERP client contract — the narrow interface the action executor drives.
//!
//! Errors carry a three-way taxonomy (validation / connection / client) so
//! an external retry policy can tell non-retryable bad input apart from
//! transient transport failures.

pub mod http;
pub mod stub;

pub use http::{HttpErpClient, HttpErpConfig};
pub use stub::StubErpClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErpError;

// ── Entities ────────────────────────────────────────────────────────

/// One position of an order sent to the ERP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub sku: String,
    #[serde(default)]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Shipped,
    Cancelled,
}

/// An order as the ERP reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErpOrder {
    pub id: Uuid,
    pub number: String,
    pub status: OrderStatus,
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub total_amount: Option<Decimal>,
    pub source: String,
    pub source_email_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "overdue" => Some(Self::Overdue),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }
}

/// An invoice as the ERP reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErpInvoice {
    pub id: Uuid,
    pub number: String,
    pub status: InvoiceStatus,
    pub amount: Decimal,
    pub customer_id: Uuid,
    pub notes: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Closed,
}

/// A support ticket as the ERP reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErpTicket {
    pub id: Uuid,
    pub number: String,
    pub subject: String,
    pub description: String,
    pub status: TicketStatus,
    pub customer_id: Uuid,
    /// 1=low, 2=medium, 3=high, 4=critical.
    pub priority: u8,
    pub source_email_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Client trait ────────────────────────────────────────────────────

/// Client for the external ERP system.
#[async_trait]
pub trait ErpClient: Send + Sync {
    /// Create an order for a customer.
    async fn create_order(
        &self,
        customer_id: Uuid,
        items: Vec<OrderItem>,
        source: &str,
        source_email_id: Option<&str>,
    ) -> Result<ErpOrder, ErpError>;

    /// Update an invoice's status, attaching notes.
    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        status: &str,
        notes: &str,
    ) -> Result<ErpInvoice, ErpError>;

    /// Open a support ticket.
    async fn create_ticket(
        &self,
        subject: &str,
        description: &str,
        customer_id: Uuid,
        priority: u8,
        source_email_id: Option<&str>,
    ) -> Result<ErpTicket, ErpError>;

    /// Whether the ERP endpoint is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}
