use serde::{Deserialize, Serialize};

use crate::ProductId;

/// One (product, quantity) pair of a staged cart snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StagedEntry {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StagedEntry {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_keeps_duplicate_products() {
        let entries = vec![
            StagedEntry::new("P1", 2),
            StagedEntry::new("P2", 5),
            StagedEntry::new("P1", 3),
        ];
        let json = serde_json::to_string(&entries).unwrap();
        let decoded: Vec<StagedEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, entries);
    }
}
