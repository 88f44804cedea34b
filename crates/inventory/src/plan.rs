//! Per-transaction deduction planning.
//!
//! Every ingredient requirement of every line item is folded into a single
//! entry per stock row before anything is written, so a row shared by two sold
//! products is decremented once with the combined total.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use larder_core::{DomainError, DomainResult, InventoryItemId};

use crate::stock::InventoryStockItem;

/// Combined deduction for one stock row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedDeduction {
    pub inventory_item_id: InventoryItemId,
    pub item_name: String,
    pub total_deduction: f64,
    /// Human-readable contributors, e.g. `"Latte x2"`.
    pub sources: Vec<String>,
}

/// Aggregated deductions keyed by stock row, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct DeductionPlan {
    entries: Vec<PlannedDeduction>,
    index: HashMap<InventoryItemId, usize>,
}

impl DeductionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `per_unit * units` of `item` on behalf of `source`.
    pub fn add(
        &mut self,
        item: &InventoryStockItem,
        per_unit: f64,
        units: u32,
        source: impl Into<String>,
    ) -> DomainResult<()> {
        if !per_unit.is_finite() || per_unit < 0.0 {
            return Err(DomainError::validation(format!(
                "required quantity for {} must be a non-negative number, got {per_unit}",
                item.name
            )));
        }

        let amount = per_unit * f64::from(units);
        let slot = match self.index.get(&item.id) {
            Some(slot) => *slot,
            None => {
                self.entries.push(PlannedDeduction {
                    inventory_item_id: item.id,
                    item_name: item.name.clone(),
                    total_deduction: 0.0,
                    sources: Vec::new(),
                });
                self.index.insert(item.id, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[slot];
        entry.total_deduction += amount;
        let source = source.into();
        if !entry.sources.contains(&source) {
            entry.sources.push(source);
        }
        Ok(())
    }

    pub fn get(&self, id: &InventoryItemId) -> Option<&PlannedDeduction> {
        self.index.get(id).map(|slot| &self.entries[*slot])
    }

    pub fn entries(&self) -> &[PlannedDeduction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split into write batches of at most `size` rows (a zero size is treated as one).
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = &[PlannedDeduction]> {
        self.entries.chunks(size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::StoreId;
    use proptest::prelude::*;

    #[test]
    fn shared_ingredient_is_aggregated_into_one_entry() {
        let store = StoreId::new();
        let milk = InventoryStockItem::new(store, "Milk", 900.0);
        let mut plan = DeductionPlan::new();

        plan.add(&milk, 150.0, 2, "Latte x2").unwrap();
        plan.add(&milk, 200.0, 1, "Cappuccino x1").unwrap();

        assert_eq!(plan.len(), 1);
        let entry = plan.get(&milk.id).unwrap();
        assert_eq!(entry.total_deduction, 500.0);
        assert_eq!(entry.sources, vec!["Latte x2", "Cappuccino x1"]);
    }

    #[test]
    fn repeated_source_is_listed_once() {
        let cups = InventoryStockItem::new(StoreId::new(), "Cups", 3.0);
        let mut plan = DeductionPlan::new();
        plan.add(&cups, 1.0, 2, "Iced Tea x2").unwrap();
        plan.add(&cups, 1.0, 2, "Iced Tea x2").unwrap();

        assert_eq!(plan.entries()[0].total_deduction, 4.0);
        assert_eq!(plan.entries()[0].sources, vec!["Iced Tea x2"]);
    }

    #[test]
    fn rejects_negative_requirement() {
        let cups = InventoryStockItem::new(StoreId::new(), "Cups", 3.0);
        let mut plan = DeductionPlan::new();
        assert!(plan.add(&cups, -1.0, 1, "Refund").is_err());
        assert!(plan.is_empty());
    }

    #[test]
    fn chunks_respect_size() {
        let store = StoreId::new();
        let mut plan = DeductionPlan::new();
        for i in 0..7 {
            let item = InventoryStockItem::new(store, format!("Item {i}"), 10.0);
            plan.add(&item, 1.0, 1, "Combo x1").unwrap();
        }

        let sizes: Vec<usize> = plan.chunks(3).map(<[_]>::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 1000, .. ProptestConfig::default() })]

        #[test]
        fn total_is_sum_of_contributions(
            stock in 0.0f64..10_000.0,
            lines in proptest::collection::vec((0.0f64..50.0, 0u32..20), 1..8),
        ) {
            let item = InventoryStockItem::new(StoreId::new(), "Sugar", stock);
            let mut plan = DeductionPlan::new();
            let mut expected = 0.0;
            for (i, (per_unit, units)) in lines.iter().enumerate() {
                plan.add(&item, *per_unit, *units, format!("line {i}")).unwrap();
                expected += per_unit * f64::from(*units);
            }

            prop_assert_eq!(plan.len(), 1);
            let entry = plan.get(&item.id).unwrap();
            prop_assert!((entry.total_deduction - expected).abs() < 1e-6);
            prop_assert!(entry.total_deduction >= 0.0);
        }
    }
}
