use super::{AddressBook, CartProvider, CartSnapshot, CatalogDirectory, CollaboratorError, ShippingAddress};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use uuid::Uuid;

/// Carts keyed by customer.
#[derive(Debug, Default)]
pub struct InMemoryCarts {
    carts: DashMap<Uuid, CartSnapshot>,
}

impl InMemoryCarts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, customer_id: Uuid, snapshot: CartSnapshot) {
        self.carts.insert(customer_id, snapshot);
    }

    pub fn contains(&self, customer_id: Uuid) -> bool {
        self.carts
            .get(&customer_id)
            .map(|cart| !cart.is_empty())
            .unwrap_or(false)
    }
}

#[async_trait]
impl CartProvider for InMemoryCarts {
    async fn snapshot(&self, customer_id: Uuid) -> Result<CartSnapshot, CollaboratorError> {
        Ok(self
            .carts
            .get(&customer_id)
            .map(|cart| cart.clone())
            .unwrap_or_default())
    }

    async fn clear(&self, customer_id: Uuid) -> Result<(), CollaboratorError> {
        self.carts.remove(&customer_id);
        Ok(())
    }
}

/// Category lead times.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    lead_times: DashMap<String, u32>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lead_times(lead_times: &HashMap<String, u32>) -> Self {
        let catalog = Self::new();
        for (category, days) in lead_times {
            catalog.set_lead_time(category, *days);
        }
        catalog
    }

    pub fn set_lead_time(&self, category: &str, days: u32) {
        self.lead_times.insert(category.to_string(), days);
    }
}

#[async_trait]
impl CatalogDirectory for InMemoryCatalog {
    async fn lead_time_days(&self, category: &str) -> Result<Option<u32>, CollaboratorError> {
        Ok(self.lead_times.get(category).map(|days| *days))
    }
}

/// Address book entries with their owning customer.
#[derive(Debug, Default)]
pub struct InMemoryAddressBook {
    entries: DashMap<Uuid, (Uuid, ShippingAddress)>,
}

impl InMemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an address for `customer_id` and returns its id.
    pub fn insert(&self, customer_id: Uuid, address: ShippingAddress) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.insert(id, (customer_id, address));
        id
    }

    pub fn remove(&self, address_id: Uuid) {
        self.entries.remove(&address_id);
    }
}

#[async_trait]
impl AddressBook for InMemoryAddressBook {
    async fn resolve(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<ShippingAddress>, CollaboratorError> {
        Ok(self
            .entries
            .get(&address_id)
            .filter(|entry| entry.0 == customer_id)
            .map(|entry| entry.1.clone()))
    }
}
