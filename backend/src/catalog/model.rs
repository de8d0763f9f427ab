//! Catalog data types

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Stable identity of a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One image of the remote catalog. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    #[serde(deserialize_with = "id_from_number_or_string")]
    pub id: ItemId,
    pub filename: String,
    pub author: String,
    pub post_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl CatalogItem {
    /// The image itself is served under the post URL
    pub fn download_url(&self) -> String {
        format!("{}/download", self.post_url.trim_end_matches('/'))
    }
}

/// The list endpoint has served ids both as numbers and as strings
fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<ItemId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => ItemId(n.to_string()),
        RawId::Text(s) => ItemId(s),
    })
}
