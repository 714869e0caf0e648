//! HTTP ERP client — reqwest-backed implementation of [`ErpClient`].
//!
//! Maps transport failures to `ErpError::Connection`, 4xx responses to
//! `ErpError::Validation`, and everything else to `ErpError::Client` so the
//! taxonomy survives into action error messages.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::erp::{ErpClient, ErpInvoice, ErpOrder, ErpTicket, OrderItem};
use crate::error::ErpError;

/// Configuration for the HTTP ERP client.
#[derive(Debug, Clone)]
pub struct HttpErpConfig {
    /// Base URL of the ERP API.
    pub base_url: String,
    /// Bearer token, if the API requires one.
    pub api_key: Option<SecretString>,
    /// Hard per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpErpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://erp-api.local".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    customer_id: Uuid,
    items: &'a [OrderItem],
    source: &'a str,
    source_email_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpdateInvoiceRequest<'a> {
    status: &'a str,
    notes: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateTicketRequest<'a> {
    subject: &'a str,
    description: &'a str,
    customer_id: Uuid,
    priority: u8,
    source_email_id: Option<&'a str>,
}

/// reqwest-backed ERP client.
pub struct HttpErpClient {
    http: reqwest::Client,
    config: HttpErpConfig,
}

impl HttpErpClient {
    pub fn new(config: HttpErpConfig) -> Result<Self, ErpError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ErpError::Client(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.config.base_url);
        let mut builder = self.http.request(method, url);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        builder
    }

    /// Send a request and decode the response, mapping failures onto the
    /// ERP error taxonomy.
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ErpError> {
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ErpError::Connection(e.to_string())
            } else {
                ErpError::Client(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ErpError::Validation(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ErpError::Client(format!("{status}: {body}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ErpError::Client(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl ErpClient for HttpErpClient {
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

        debug!(customer_id = %customer_id, items = items.len(), "Creating order in ERP");
        let order: ErpOrder = self
            .send(self.request(reqwest::Method::POST, "/orders").json(
                &CreateOrderRequest {
                    customer_id,
                    items: &items,
                    source,
                    source_email_id,
                },
            ))
            .await?;
        Ok(order)
    }

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        status: &str,
        notes: &str,
    ) -> Result<ErpInvoice, ErpError> {
        debug!(invoice_id = %invoice_id, status, "Updating invoice in ERP");
        let invoice: ErpInvoice = self
            .send(
                self.request(
                    reqwest::Method::PATCH,
                    &format!("/invoices/{invoice_id}"),
                )
                .json(&UpdateInvoiceRequest { status, notes }),
            )
            .await?;
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

        debug!(customer_id = %customer_id, priority, "Creating ticket in ERP");
        let ticket: ErpTicket = self
            .send(self.request(reqwest::Method::POST, "/tickets").json(
                &CreateTicketRequest {
                    subject,
                    description,
                    customer_id,
                    priority,
                    source_email_id,
                },
            ))
            .await?;
        Ok(ticket)
    }

    async fn health_check(&self) -> bool {
        match self.request(reqwest::Method::GET, "/health").send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "ERP health check failed");
                false
            }
        }
    }
}
