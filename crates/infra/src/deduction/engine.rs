use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, instrument, warn};

use larder_catalog::RecipeIngredient;
use larder_core::{InventoryItemId, RecipeId, StoreId, TransactionId};
use larder_inventory::{Actor, InventoryMovement, PlannedDeduction};

use super::resolve::{ResolutionInputs, build_plan};
use super::{DeductedItem, DeductionReport, DeductionRequest, LineItem};
use crate::backend::{SharedBackend, StockDecrement, StockWriteOutcome};
use crate::config::EngineConfig;
use crate::error::{BackendError, DeductionError};

type SharedReport = Arc<Mutex<DeductionReport>>;

fn lock(report: &SharedReport) -> std::sync::MutexGuard<'_, DeductionReport> {
    report.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves sold items to stock rows and applies the deductions.
#[derive(Clone)]
pub struct DeductionEngine {
    backend: SharedBackend,
    write_chunk_size: usize,
    default_timeout: Duration,
}

impl core::fmt::Debug for DeductionEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeductionEngine")
            .field("write_chunk_size", &self.write_chunk_size)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// What a write task needs besides the rows themselves.
#[derive(Clone)]
struct WriteContext {
    backend: SharedBackend,
    store_id: StoreId,
    transaction_id: TransactionId,
    actor: Actor,
    report: SharedReport,
}

impl DeductionEngine {
    pub fn new(backend: SharedBackend, config: &EngineConfig) -> Self {
        Self {
            backend,
            write_chunk_size: config.write_chunk_size.max(1),
            default_timeout: config.deduction_timeout,
        }
    }

    /// Deduct the ingredients of every line item from store stock.
    ///
    /// Never returns an error: every problem is recorded on the report.
    #[instrument(
        skip(self, request),
        fields(
            store_id = %request.store_id,
            transaction_id = %request.transaction_id,
            line_items = request.line_items.len()
        )
    )]
    pub async fn deduct(&self, request: DeductionRequest) -> DeductionReport {
        let started = Instant::now();
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let report: SharedReport = Arc::new(Mutex::new(DeductionReport::new(request.transaction_id)));

        let run = self.run(&request, Arc::clone(&report));
        if tokio::time::timeout(timeout, run).await.is_err() {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(timeout_ms, "deduction timed out; writes already issued may have landed");
            lock(&report).fail(DeductionError::ProcessingTimeout { timeout_ms });
        }

        let mut report = lock(&report).clone();
        report.processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            success = report.success,
            deducted = report.deducted_items.len(),
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            elapsed_ms = report.processing_time_ms,
            "deduction finished"
        );
        report
    }

    async fn run(&self, request: &DeductionRequest, report: SharedReport) {
        let inputs = match self.fetch_inputs(request).await {
            Ok((inputs, warnings)) => {
                lock(&report).warnings.extend(warnings);
                inputs
            }
            Err(e) => {
                warn!(error = %e, "deduction inputs could not be loaded");
                lock(&report).fail(DeductionError::Fetch(e.to_string()));
                return;
            }
        };

        let resolution = build_plan(&request.line_items, &inputs);
        {
            let mut report = lock(&report);
            report.items_processed = resolution.items_processed;
            report.warnings.extend(resolution.warnings);
        }

        if resolution.plan.is_empty() {
            lock(&report).warn(DeductionError::Resolution("No inventory items to update".to_string()));
            return;
        }

        let context = WriteContext {
            backend: Arc::clone(&self.backend),
            store_id: request.store_id,
            transaction_id: request.transaction_id,
            actor: request.actor,
            report: Arc::clone(&report),
        };

        let chunks: Vec<Vec<PlannedDeduction>> = resolution
            .plan
            .chunks(self.write_chunk_size)
            .map(<[PlannedDeduction]>::to_vec)
            .collect();
        debug!(rows = resolution.plan.len(), chunks = chunks.len(), "applying deduction plan");

        let rows = row_names(chunks.iter().flatten());
        // Spawned so a timeout stops the wait, not the claim and the writes behind it.
        let committed = tokio::spawn(commit(context, chunks).in_current_span()).await;
        if let Err(e) = committed {
            warn!(error = %e, rows = rows.len(), "deduction task failed");
            let mut report = lock(&report);
            for (inventory_item_id, item_name) in rows {
                report.fail(DeductionError::Write {
                    inventory_item_id,
                    item_name,
                    reason: format!("deduction task failed: {e}"),
                });
            }
        }
    }

    /// Read everything the resolver needs: four concurrent reads, then ingredients.
    ///
    /// Catalog and stock failures abort the deduction; a failed name lookup
    /// only narrows the cascade and is reported as a warning.
    async fn fetch_inputs(
        &self,
        request: &DeductionRequest,
    ) -> Result<(ResolutionInputs, Vec<DeductionError>), BackendError> {
        let store_id = request.store_id;
        let product_ids = sold_product_ids(&request.line_items);
        let names = item_names(&request.line_items);

        let catalog = async {
            if product_ids.is_empty() {
                Ok(Vec::new())
            } else {
                self.backend.fetch_products(store_id, Some(product_ids.as_slice())).await
            }
        };
        let (catalog, recipes, templates, inventory) = tokio::join!(
            catalog,
            self.backend.fetch_recipes_by_names(store_id, &names),
            self.backend.fetch_templates_by_names(&names),
            self.backend.fetch_inventory(store_id),
        );

        let mut warnings = Vec::new();
        let mut inputs = ResolutionInputs {
            catalog: catalog?,
            inventory: inventory?,
            ..ResolutionInputs::default()
        };
        match recipes {
            Ok(recipes) => inputs.recipes_by_name = recipes,
            Err(e) => warnings.push(DeductionError::Resolution(format!("Error fetching recipes by name: {e}"))),
        }
        match templates {
            Ok(templates) => inputs.templates = templates,
            Err(e) => warnings.push(DeductionError::Resolution(format!(
                "Error fetching recipe templates: {e}"
            ))),
        }

        let recipe_ids = inputs.recipe_ids();
        if !recipe_ids.is_empty() {
            let rows = self
                .backend
                .fetch_recipe_ingredients(store_id, &recipe_ids)
                .await?;
            inputs.ingredients = group_by_recipe(rows);
        }

        debug!(
            catalog = inputs.catalog.len(),
            named_recipes = inputs.recipes_by_name.len(),
            templates = inputs.templates.len(),
            stock_rows = inputs.inventory.len(),
            "deduction inputs loaded"
        );
        Ok((inputs, warnings))
    }
}

fn sold_product_ids(items: &[LineItem]) -> Vec<larder_core::ProductId> {
    let mut ids: Vec<_> = items.iter().filter_map(|item| item.product_id).collect();
    ids.sort();
    ids.dedup();
    ids
}

fn item_names(items: &[LineItem]) -> Vec<String> {
    let mut names: Vec<String> = items
        .iter()
        .map(|item| item.name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

fn group_by_recipe(rows: Vec<RecipeIngredient>) -> HashMap<RecipeId, Vec<RecipeIngredient>> {
    let mut grouped: HashMap<RecipeId, Vec<RecipeIngredient>> = HashMap::new();
    for row in rows {
        grouped.entry(row.recipe_id).or_default().push(row);
    }
    grouped
}

fn row_names<'a>(planned: impl Iterator<Item = &'a PlannedDeduction>) -> Vec<(InventoryItemId, String)> {
    planned
        .map(|p| (p.inventory_item_id, p.item_name.clone()))
        .collect()
}

/// Claim the transaction, then apply every chunk concurrently.
///
/// When no stock row was written the claim is released again, so a sale that
/// failed outright can be retried under the same transaction id.
async fn commit(context: WriteContext, chunks: Vec<Vec<PlannedDeduction>>) {
    match context
        .backend
        .claim_transaction(context.store_id, context.transaction_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!("transaction already deducted");
            lock(&context.report).fail(DeductionError::DuplicateTransaction(context.transaction_id));
            return;
        }
        Err(e) => {
            lock(&context.report).fail(DeductionError::Claim(e.to_string()));
            return;
        }
    }

    let (rows, handles): (Vec<_>, Vec<_>) = chunks
        .into_iter()
        .map(|chunk| {
            let rows = row_names(chunk.iter());
            let context = context.clone();
            (rows, tokio::spawn(write_chunk(context, chunk).in_current_span()))
        })
        .unzip();

    let mut lost_chunks = 0_usize;
    for (rows, joined) in rows.into_iter().zip(join_all(handles).await) {
        if let Err(e) = joined {
            lost_chunks += 1;
            warn!(error = %e, rows = rows.len(), "deduction write task failed");
            let mut report = lock(&context.report);
            for (inventory_item_id, item_name) in rows {
                report.fail(DeductionError::Write {
                    inventory_item_id,
                    item_name,
                    reason: format!("write task failed: {e}"),
                });
            }
        }
    }

    // A panicked chunk may have written before failing; keep its claim.
    let nothing_written = lost_chunks == 0 && lock(&context.report).deducted_items.is_empty();
    if nothing_written {
        match context
            .backend
            .release_transaction(context.store_id, context.transaction_id)
            .await
        {
            Ok(()) => debug!("no stock written; transaction claim released"),
            Err(e) => warn!(error = %e, "transaction claim could not be released"),
        }
    }
}

async fn write_chunk(context: WriteContext, chunk: Vec<PlannedDeduction>) {
    let decrements: Vec<StockDecrement> = chunk
        .iter()
        .map(|planned| StockDecrement {
            inventory_item_id: planned.inventory_item_id,
            amount: planned.total_deduction,
        })
        .collect();
    let planned: HashMap<InventoryItemId, &PlannedDeduction> =
        chunk.iter().map(|p| (p.inventory_item_id, p)).collect();

    let outcomes = match context
        .backend
        .apply_decrements(context.store_id, &decrements)
        .await
    {
        Ok(outcomes) => outcomes,
        Err(e) => {
            warn!(error = %e, rows = chunk.len(), "stock write failed for chunk");
            let mut report = lock(&context.report);
            for p in &chunk {
                report.fail(DeductionError::Write {
                    inventory_item_id: p.inventory_item_id,
                    item_name: p.item_name.clone(),
                    reason: e.to_string(),
                });
            }
            return;
        }
    };

    let now = Utc::now();
    let mut movements = Vec::with_capacity(outcomes.len());
    {
        let mut report = lock(&context.report);
        for outcome in outcomes {
            let Some(p) = planned.get(&outcome.inventory_item_id()) else {
                continue;
            };
            match outcome {
                StockWriteOutcome::Applied {
                    inventory_item_id,
                    previous,
                    new,
                } => {
                    report.deducted_items.push(DeductedItem {
                        inventory_item_id,
                        item_name: p.item_name.clone(),
                        requested: p.total_deduction,
                        quantity_deducted: previous - new,
                        previous_stock: previous,
                        new_stock: new,
                    });
                    movements.push(InventoryMovement::sale(
                        context.store_id,
                        inventory_item_id,
                        previous,
                        new,
                        context.transaction_id,
                        format!("Deduction for {}", p.sources.join(", ")),
                        context.actor,
                        now,
                    ));
                }
                StockWriteOutcome::Failed {
                    inventory_item_id,
                    reason,
                } => {
                    warn!(inventory_item_id = %inventory_item_id, item = %p.item_name, %reason, "stock row not updated");
                    report.fail(DeductionError::Write {
                        inventory_item_id,
                        item_name: p.item_name.clone(),
                        reason,
                    });
                }
            }
        }
    }

    if movements.is_empty() {
        return;
    }

    // Audit rows never hold up the sale.
    let backend = Arc::clone(&context.backend);
    tokio::spawn(async move {
        if let Err(e) = backend.insert_movements(&movements).await {
            let error = DeductionError::AuditLog(e.to_string());
            warn!(error = %error, rows = movements.len(), "inventory movements not recorded");
        }
    });
}
