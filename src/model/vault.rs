use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::item::Item;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub position: u32,
}

/// A vault as the peer sends it. Replaced wholesale on every sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Vault {
    /// A vault known only by id, before its first full sync.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            items: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Validate every item.
    pub fn validate(&self) -> Result<()> {
        self.items.iter().try_for_each(Item::validate)
    }

    pub fn item(&self, item_id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id() == item_id)
    }
}

/// Merge `incoming` into `current`, last writer wins by `updatedAt`.
///
/// Items present on only one side are kept. Order follows `current`, with
/// new items appended in their incoming order.
pub fn merge_items(current: Vec<Item>, incoming: Vec<Item>) -> Vec<Item> {
    let mut merged = current;
    let positions: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(index, item)| (item.id().to_string(), index))
        .collect();

    for item in incoming {
        match positions.get(item.id()) {
            Some(&index) => {
                if item.updated_at() > merged[index].updated_at() {
                    merged[index] = item;
                }
            }
            None => merged.push(item),
        }
    }
    merged
}
