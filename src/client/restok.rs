//! Restok inventory: items and their sub-items.
//!
//! Sub-items have no endpoint of their own. Every sub-item edit resends the
//! whole parent item.

use std::ops::Deref;

use super::collection::Collection;
use crate::domain::{Item, SubItem, new_id};
use crate::errors::ProductionError;

#[derive(Clone)]
pub struct Restok {
    items: Collection<Item>,
}

impl Deref for Restok {
    type Target = Collection<Item>;

    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl Restok {
    pub fn new(items: Collection<Item>) -> Self {
        Self { items }
    }

    /// Add `delta` (may be negative) to an item's stock.
    pub fn adjust_quantity(&self, id: &str, delta: i64) -> Result<Item, ProductionError> {
        self.items.modify(id, |item| {
            let next = item.quantity.checked_add(delta).ok_or_else(|| {
                ProductionError::validation(
                    "quantity",
                    format!("adjusting '{}' by {} is out of range", item.name, delta),
                )
            })?;
            if next < 0 {
                return Err(ProductionError::validation(
                    "quantity",
                    format!("only {} {} of '{}' in stock", item.quantity, item.unit, item.name),
                ));
            }
            item.quantity = next;
            Ok(())
        })
    }

    pub fn add_sub_item(
        &self,
        item_id: &str,
        name: &str,
        quantity: i64,
    ) -> Result<Item, ProductionError> {
        self.items.modify(item_id, |item| {
            item.sub_items.push(SubItem {
                id: new_id(),
                name: name.trim().to_string(),
                quantity,
            });
            Ok(())
        })
    }

    /// Replace one sub-item by id.
    pub fn update_sub_item(&self, item_id: &str, sub: SubItem) -> Result<Item, ProductionError> {
        self.items.modify(item_id, |item| {
            let slot = item
                .sub_items
                .iter_mut()
                .find(|s| s.id == sub.id)
                .ok_or_else(|| ProductionError::RecordNotFound {
                    resource: "Sub-item",
                    id: sub.id.clone(),
                })?;
            *slot = sub;
            Ok(())
        })
    }

    pub fn remove_sub_item(&self, item_id: &str, sub_id: &str) -> Result<Item, ProductionError> {
        self.items.modify(item_id, |item| {
            let before = item.sub_items.len();
            item.sub_items.retain(|s| s.id != sub_id);
            if item.sub_items.len() == before {
                return Err(ProductionError::RecordNotFound {
                    resource: "Sub-item",
                    id: sub_id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Items at or below their minimum stock.
    pub fn low_stock(&self) -> Vec<Item> {
        self.items
            .snapshot()
            .into_iter()
            .filter(Item::is_low_stock)
            .collect()
    }
}
