//! HTTP client for the catalog list endpoint

use super::model::CatalogItem;
use rand::Rng;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("catalog returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid catalog URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    list_url: Url,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Result<Self, CatalogError> {
        // Without the trailing slash `join` would replace the last segment
        let base = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };

        Ok(Self {
            http,
            list_url: base.join("list")?,
        })
    }

    /// Fetch the full remote list
    pub async fn fetch_list(&self) -> Result<Vec<CatalogItem>, CatalogError> {
        let response = self.http.get(self.list_url.clone()).send().await?;
        debug!("Catalog responded with {}", response.status());

        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status()));
        }

        Ok(response.json().await?)
    }
}

/// Keep `size` consecutive entries starting at a random offset.
/// Lists no longer than `size` are returned whole.
pub fn sample_window<T, R: Rng>(mut list: Vec<T>, size: usize, rng: &mut R) -> Vec<T> {
    if list.len() <= size {
        return list;
    }

    let start = rng.gen_range(0..=list.len() - size);
    list.truncate(start + size);
    list.drain(..start);
    list
}
