//! OS catalog listing types.

use serde::{Deserialize, Serialize};

/// OS list request payload. A blank or absent query lists everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsSearchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
}

/// One catalog entry as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_download_size: Option<u64>,
}

/// OS list response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsSearchResponse {
    /// The query after alias expansion, empty when listing everything.
    pub query: String,
    pub items: Vec<OsItem>,
}
