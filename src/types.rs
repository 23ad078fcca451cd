//! Shared primitive IDs and the catalog collection enum.

use serde::{Deserialize, Serialize};

/// Monotonic position in a collection's remote change log.
pub type LogPosition = u64;
/// Locally generated outbox batch identifier.
pub type BatchId = u64;
/// Local store schema version; a bump wipes cache and watermarks.
pub type SchemaVersion = u32;

/// Named set of same-typed cached entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// Customer records, keyed by `comcode`.
    Customers,
    /// Product records, keyed by `barcode`.
    Products,
    /// Product category records.
    Categories,
    /// Bill-of-materials records.
    BillOfMaterials,
}

impl Collection {
    /// All collections, in the order full sync walks them.
    pub const ALL: [Collection; 4] = [
        Collection::Customers,
        Collection::Products,
        Collection::Categories,
        Collection::BillOfMaterials,
    ];

    /// Stable storage name used in sqlite rows and status text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Customers => "customers",
            Collection::Products => "products",
            Collection::Categories => "categories",
            Collection::BillOfMaterials => "bill_of_materials",
        }
    }

    /// Parses a stable storage name back into a collection.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "customers" => Some(Collection::Customers),
            "products" => Some(Collection::Products),
            "categories" => Some(Collection::Categories),
            "bill_of_materials" => Some(Collection::BillOfMaterials),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
