use async_trait::async_trait;
use fairway_core::repository::{AddOnCatalog, CatalogAddOn};
use fairway_core::{Cents, StoreResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Add-on price list per course
#[derive(Default)]
pub struct InMemoryAddOnCatalog {
    items: RwLock<HashMap<(Uuid, String), CatalogAddOn>>,
}

impl InMemoryAddOnCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, course_id: Uuid, id: &str, name: &str, price: Cents) {
        self.items.write().await.insert(
            (course_id, id.to_string()),
            CatalogAddOn {
                id: id.to_string(),
                name: name.to_string(),
                price,
            },
        );
    }
}

#[async_trait]
impl AddOnCatalog for InMemoryAddOnCatalog {
    async fn add_on(&self, course_id: Uuid, add_on_id: &str) -> StoreResult<Option<CatalogAddOn>> {
        Ok(self
            .items
            .read()
            .await
            .get(&(course_id, add_on_id.to_string()))
            .cloned())
    }
}
