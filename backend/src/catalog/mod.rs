//! Remote photo catalog: fetching the list and holding what the UI shows

mod client;
mod model;

pub use client::{sample_window, CatalogClient, CatalogError};
pub use model::{CatalogItem, ItemId};

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// What the list currently shows
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CatalogState {
    Loading,
    Ready { items: Vec<CatalogItem> },
    /// A fetch failure blocks the whole list
    Failed { error: String },
}

/// Catalog client plus the last fetched sample
#[derive(Clone)]
pub struct Catalog {
    client: CatalogClient,
    sample_size: usize,
    state: Arc<RwLock<CatalogState>>,
}

impl Catalog {
    pub fn new(client: CatalogClient, sample_size: usize) -> Self {
        Self {
            client,
            sample_size,
            state: Arc::new(RwLock::new(CatalogState::Loading)),
        }
    }

    /// Current catalog state
    pub fn state(&self) -> CatalogState {
        self.state.read().clone()
    }

    /// Look up an item of the current sample
    pub fn find(&self, id: &ItemId) -> Option<CatalogItem> {
        match &*self.state.read() {
            CatalogState::Ready { items } => items.iter().find(|item| &item.id == id).cloned(),
            _ => None,
        }
    }

    /// Items of the current sample, empty unless the catalog is ready
    pub fn items(&self) -> Vec<CatalogItem> {
        match &*self.state.read() {
            CatalogState::Ready { items } => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Replace the current sample with `items`
    pub fn set_items(&self, items: Vec<CatalogItem>) {
        *self.state.write() = CatalogState::Ready { items };
    }

    /// Fetch the remote list and keep a random window of it
    pub async fn refresh(&self) -> Result<usize, CatalogError> {
        *self.state.write() = CatalogState::Loading;

        match self.client.fetch_list().await {
            Ok(list) => {
                let items = sample_window(list, self.sample_size, &mut rand::thread_rng());
                let count = items.len();
                info!("Catalog loaded with {} images", count);
                self.set_items(items);
                Ok(count)
            }
            Err(e) => {
                error!("Unable to retrieve images: {}", e);
                *self.state.write() = CatalogState::Failed {
                    error: e.to_string(),
                };
                Err(e)
            }
        }
    }
}
