//! Checkout-time cart validation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use larder_catalog::{AvailabilityPolicy, AvailabilityStatus, ProductAvailability};
use larder_core::{ProductId, StoreId};

use crate::error::FetchError;
use crate::snapshot::SnapshotFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// One entry per distinct product in the cart, in product id order.
    pub availability: Vec<ProductAvailability>,
}

#[derive(Debug)]
pub struct CartValidator {
    fetcher: Arc<SnapshotFetcher>,
    policy: AvailabilityPolicy,
}

impl CartValidator {
    pub fn new(fetcher: Arc<SnapshotFetcher>, policy: AvailabilityPolicy) -> Self {
        Self { fetcher, policy }
    }

    /// Check that every line can be sold in the requested quantity.
    ///
    /// Lines for the same product are summed before checking. Reads only the
    /// cart's products, so cost follows cart size.
    #[instrument(skip(self, lines), fields(store_id = %store_id, lines = lines.len()), err)]
    pub async fn validate(&self, store_id: StoreId, lines: &[CartLine]) -> Result<CartValidation, FetchError> {
        let mut requested: BTreeMap<ProductId, u32> = BTreeMap::new();
        for line in lines {
            let total = requested.entry(line.product_id).or_default();
            *total = total.saturating_add(line.quantity);
        }

        let ids: Vec<ProductId> = requested.keys().copied().collect();
        let snapshot = self.fetcher.fetch_cart_snapshot(store_id, &ids).await?;

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut availability = Vec::with_capacity(requested.len());

        for (product_id, quantity) in requested {
            let Some(product) = snapshot.product(&product_id) else {
                errors.push(format!("Product not found: {product_id}"));
                continue;
            };
            let result = snapshot.availability_of(&product_id, &self.policy);

            if !product.is_available {
                errors.push(format!("{} is not available for sale", product.name));
            } else if result.status == AvailabilityStatus::OutOfStock {
                errors.push(format!("{} is out of stock", product.name));
            } else if result.quantity < quantity {
                errors.push(format!(
                    "Insufficient {}: need {quantity}, available {}",
                    product.name, result.quantity
                ));
            } else if result.status == AvailabilityStatus::LowStock {
                warnings.push(format!(
                    "{} is low in stock ({} remaining)",
                    product.name, result.quantity
                ));
            }
            availability.push(result);
        }

        debug!(errors = errors.len(), warnings = warnings.len(), "cart validated");
        Ok(CartValidation {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            availability,
        })
    }
}
