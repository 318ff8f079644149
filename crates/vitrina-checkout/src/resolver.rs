//! # Sale Reference Resolver
//!
//! Turns a sale id or a customer DNI into the sale being charged, and keeps
//! the last one resolved.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use vitrina_core::validation::{normalize_dni, validate_sale_id};
use vitrina_core::Sale;

use crate::backend::PaymentBackend;
use crate::error::{CheckoutError, CheckoutResult};

/// How the cashier identified the sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleRef {
    Id(String),
    /// The customer's latest pending sale.
    CustomerDni(String),
}

pub struct SaleResolver {
    backend: Arc<dyn PaymentBackend>,
    cache: RwLock<Option<Sale>>,
}

impl SaleResolver {
    pub fn new(backend: Arc<dyn PaymentBackend>) -> Self {
        SaleResolver {
            backend,
            cache: RwLock::new(None),
        }
    }

    pub async fn resolve_ref(&self, sale_ref: &SaleRef) -> CheckoutResult<Sale> {
        match sale_ref {
            SaleRef::Id(id) => self.resolve(id).await,
            SaleRef::CustomerDni(dni) => self.resolve_by_customer(dni).await,
        }
    }

    /// Fetches a sale by id and caches it.
    pub async fn resolve(&self, sale_id: &str) -> CheckoutResult<Sale> {
        let sale_id = sale_id.trim();
        validate_sale_id(sale_id)?;

        let sale = self.backend.fetch_sale(sale_id).await?;
        info!(sale_id = %sale.id, total = %sale.total, lines = sale.lines.len(), "Sale resolved");
        *self.cache.write().await = Some(sale.clone());
        Ok(sale)
    }

    /// Resolves the latest pending sale of a customer.
    pub async fn resolve_by_customer(&self, dni: &str) -> CheckoutResult<Sale> {
        let dni = normalize_dni(dni)?;
        let pending = self.backend.pending_sales(&dni).await?;
        debug!(count = pending.len(), "Pending sales for customer");

        let first = pending
            .into_iter()
            .next()
            .ok_or_else(|| CheckoutError::SaleNotFound(format!("no pending sale for DNI {dni}")))?;
        self.resolve(&first.sale_id).await
    }

    /// Re-fetches the cached sale.
    pub async fn refresh(&self) -> CheckoutResult<Sale> {
        let sale_id = self
            .cache
            .read()
            .await
            .as_ref()
            .map(|s| s.id.clone())
            .ok_or_else(|| CheckoutError::SaleNotFound("no sale resolved yet".into()))?;
        self.resolve(&sale_id).await
    }

    pub async fn cached(&self) -> Option<Sale> {
        self.cache.read().await.clone()
    }

    /// Cancels a sale and evicts it from the cache.
    pub async fn cancel(&self, sale_id: &str) -> CheckoutResult<()> {
        let sale_id = sale_id.trim();
        validate_sale_id(sale_id)?;

        self.backend.cancel_sale(sale_id).await?;
        info!(sale_id, "Sale cancelled");

        let mut cache = self.cache.write().await;
        if cache.as_ref().is_some_and(|s| s.id == sale_id) {
            *cache = None;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
