use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    collaborators::{CollaboratorError, ShippingAddress},
    db::DbPool,
    entities::{invoice, order, order_item},
    errors::ServiceError,
    lifecycle::{Capability, Totals},
};

/// Everything the document generator needs to render an invoice.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRequest {
    pub invoice_number: String,
    pub order_number: String,
    pub customer_id: Uuid,
    pub payment_method: order::PaymentMethod,
    pub shipping_address: ShippingAddress,
    pub lines: Vec<InvoiceLine>,
    pub totals: Totals,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceLine {
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedDocument {
    pub document_ref: String,
    pub checksum: String,
}

/// Invoice document generator.
#[async_trait]
pub trait InvoiceIssuer: Send + Sync {
    async fn issue(&self, request: &InvoiceRequest) -> Result<IssuedDocument, CollaboratorError>;
}

/// Keys documents by invoice number and fingerprints their content, so the
/// same order always yields an equivalent document.
#[derive(Debug, Clone, Default)]
pub struct DigestInvoiceIssuer;

#[async_trait]
impl InvoiceIssuer for DigestInvoiceIssuer {
    async fn issue(&self, request: &InvoiceRequest) -> Result<IssuedDocument, CollaboratorError> {
        let canonical = serde_json::to_vec(request).map_err(|e| CollaboratorError::Rejected {
            collaborator: "invoice generator",
            message: e.to_string(),
        })?;
        Ok(IssuedDocument {
            document_ref: format!("invoice://{}", request.invoice_number),
            checksum: hex::encode(Sha256::digest(&canonical)),
        })
    }
}

#[derive(Clone)]
pub struct InvoicingService {
    db_pool: Arc<DbPool>,
    issuer: Arc<dyn InvoiceIssuer>,
}

impl InvoicingService {
    pub fn new(db_pool: Arc<DbPool>, issuer: Arc<dyn InvoiceIssuer>) -> Self {
        Self { db_pool, issuer }
    }

    /// Issues the invoice for an order, at most once. Repeated calls return
    /// the stored invoice without contacting the generator again.
    #[instrument(skip(self, cap))]
    pub async fn issue_invoice(
        &self,
        order_id: Uuid,
        cap: &Capability,
    ) -> Result<invoice::Model, ServiceError> {
        let db = &*self.db_pool;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .filter(|o| cap.can_access(o.customer_id))
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if let Some(existing) = self.find_for_order(order_id).await? {
            return Ok(existing);
        }

        let request = self.build_request(&order).await?;
        let document = self.issuer.issue(&request).await?;

        let inserted = invoice::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            invoice_number: Set(order.invoice_number.clone()),
            document_ref: Set(document.document_ref),
            checksum: Set(document.checksum),
            issued_at: Set(Utc::now()),
        }
        .insert(db)
        .await;

        match inserted {
            Ok(invoice) => {
                info!(invoice_number = %invoice.invoice_number, "invoice issued");
                Ok(invoice)
            }
            // A concurrent request stored the invoice first.
            Err(e) => match self.find_for_order(order_id).await? {
                Some(existing) => {
                    warn!(error = %e, invoice_number = %existing.invoice_number, "invoice already issued");
                    Ok(existing)
                }
                None => Err(e.into()),
            },
        }
    }

    async fn find_for_order(&self, order_id: Uuid) -> Result<Option<invoice::Model>, ServiceError> {
        Ok(invoice::Entity::find()
            .filter(invoice::Column::OrderId.eq(order_id))
            .one(&*self.db_pool)
            .await?)
    }

    async fn build_request(&self, order: &order::Model) -> Result<InvoiceRequest, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::LineNo)
            .all(&*self.db_pool)
            .await?;
        let shipping_address = order.shipping_address().map_err(|e| {
            ServiceError::InternalError(format!(
                "stored address of {} is unreadable: {}",
                order.order_number, e
            ))
        })?;

        Ok(InvoiceRequest {
            invoice_number: order.invoice_number.clone(),
            order_number: order.order_number.clone(),
            customer_id: order.customer_id,
            payment_method: order.payment_method,
            shipping_address,
            lines: items
                .into_iter()
                .map(|item| InvoiceLine {
                    name: item.name,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    line_total: item.line_total,
                })
                .collect(),
            totals: order.totals(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> InvoiceRequest {
        InvoiceRequest {
            invoice_number: "INV-20260301-QX81ZA".into(),
            order_number: "ORD-20260301-QX81ZA".into(),
            customer_id: Uuid::nil(),
            payment_method: order::PaymentMethod::Card,
            shipping_address: ShippingAddress {
                full_name: "Asha Rao".into(),
                phone: "+91 98450 12345".into(),
                line1: "14 Residency Road".into(),
                line2: None,
                city: "Bengaluru".into(),
                state: "Karnataka".into(),
                postal_code: "560025".into(),
                country: "India".into(),
            },
            lines: vec![InvoiceLine {
                name: "Teak dining table".into(),
                unit_price: dec!(42000.00),
                quantity: 1,
                line_total: dec!(42000.00),
            }],
            totals: Totals::compute(dec!(42000.00), dec!(1500.00), dec!(0)),
        }
    }

    #[tokio::test]
    async fn digest_issuer_is_deterministic() {
        let issuer = DigestInvoiceIssuer;
        let first = issuer.issue(&request()).await.unwrap();
        let second = issuer.issue(&request()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.document_ref, "invoice://INV-20260301-QX81ZA");
        assert_eq!(first.checksum.len(), 64);
    }

    #[tokio::test]
    async fn checksum_tracks_content() {
        let issuer = DigestInvoiceIssuer;
        let mut changed = request();
        changed.lines[0].quantity = 2;
        let a = issuer.issue(&request()).await.unwrap();
        let b = issuer.issue(&changed).await.unwrap();
        assert_ne!(a.checksum, b.checksum);
    }
}
