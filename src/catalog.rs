//! OS catalog
//!
//! The catalog maps an `os_id` to the image URL and, when published, its
//! expected SHA-256. It is stored on disk in normalized form:
//!
//! ```json
//! {"items": [{"id": "rpi-os-lite", "name": "...", "url": "https://...", "sha256": "..."}]}
//! ```
//!
//! [`search`] filters the catalog for the `os` operation: every whitespace
//! separated term of the query must occur, ignoring case, in the item's
//! name, description or id. A few common nicknames are expanded first.

use std::fs;
use std::path::{Path, PathBuf};

use gsd_protocol::ops::OsItem;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whole-query nicknames and what they search for.
const QUERY_ALIASES: &[(&str, &str)] = &[("raspi", "raspberry"), ("rpi", "raspberry")];

/// Errors from catalog lookup
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One installable OS image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_download_size: Option<u64>,
}

impl CatalogItem {
    /// Expected digest, lower-cased; `None` when absent or blank.
    pub fn expected_sha256(&self) -> Option<String> {
        self.sha256
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    items: Vec<CatalogItem>,
}

impl From<CatalogItem> for OsItem {
    fn from(item: CatalogItem) -> Self {
        OsItem {
            id: item.id,
            name: item.name,
            description: item.description,
            url: item.url,
            sha256: item.sha256,
            image_download_size: item.image_download_size,
        }
    }
}

/// Source of installable OS images.
pub trait OsCatalog: Send + Sync {
    /// Every item, in catalog order.
    fn items(&self) -> Result<Vec<CatalogItem>, CatalogError>;

    fn lookup(&self, os_id: &str) -> Result<Option<CatalogItem>, CatalogError> {
        Ok(self.items()?.into_iter().find(|item| item.id == os_id))
    }
}

/// Lower-cased, trimmed query with nicknames expanded.
pub fn normalize_query(q: &str) -> String {
    let q = q.trim().to_lowercase();
    QUERY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == q)
        .map(|(_, expanded)| expanded.to_string())
        .unwrap_or(q)
}

/// Items matching every term of the normalized query `q`.
pub fn search(items: Vec<CatalogItem>, q: &str) -> Vec<CatalogItem> {
    let terms: Vec<&str> = q.split_whitespace().collect();
    if terms.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| {
            let haystack = format!("{} {} {}", item.name, item.description, item.id).to_lowercase();
            terms.iter().all(|term| haystack.contains(term))
        })
        .collect()
}

/// Catalog read from a JSON file on every lookup.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    path: PathBuf,
}

impl CatalogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<CatalogDocument, CatalogError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| CatalogError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl OsCatalog for CatalogFile {
    fn items(&self) -> Result<Vec<CatalogItem>, CatalogError> {
        Ok(self.load()?.items)
    }
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    items: Vec<CatalogItem>,
}

impl StaticCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }

    /// Add an entry by id, URL and optional digest.
    pub fn with(mut self, id: &str, url: &str, sha256: Option<&str>) -> Self {
        self.items.push(CatalogItem {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            url: url.to_string(),
            sha256: sha256.map(str::to_string),
            image_download_size: None,
        });
        self
    }
}

impl OsCatalog for StaticCatalog {
    fn items(&self) -> Result<Vec<CatalogItem>, CatalogError> {
        Ok(self.items.clone())
    }

    fn lookup(&self, os_id: &str) -> Result<Option<CatalogItem>, CatalogError> {
        Ok(self.items.iter().find(|item| item.id == os_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_catalog_file_lookup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("os_catalog.json");
        fs::write(
            &path,
            r#"{"items":[
                {"id":"rpi-os","name":"Raspberry Pi OS","description":"","url":"https://x/rpi.img.xz","sha256":"ABCDEF","image_download_size":123},
                {"id":"ubuntu","name":"Ubuntu","url":"https://x/ubuntu.img.xz","sha256":""}
            ]}"#,
        )
        .unwrap();
        let catalog = CatalogFile::new(&path);

        let rpi = catalog.lookup("rpi-os").unwrap().unwrap();
        assert_eq!(rpi.url, "https://x/rpi.img.xz");
        assert_eq!(rpi.expected_sha256().as_deref(), Some("abcdef"));

        let ubuntu = catalog.lookup("ubuntu").unwrap().unwrap();
        assert_eq!(ubuntu.expected_sha256(), None);

        assert!(catalog.lookup("RPI-OS").unwrap().is_none());
    }

    #[test]
    fn test_missing_catalog_is_io_error() {
        let dir = TempDir::new().unwrap();
        let catalog = CatalogFile::new(dir.path().join("none.json"));
        assert!(matches!(catalog.lookup("x"), Err(CatalogError::Io { .. })));
    }

    fn named(id: &str, name: &str, description: &str) -> CatalogItem {
        CatalogItem {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            url: format!("https://x/{}.img.xz", id),
            sha256: None,
            image_download_size: None,
        }
    }

    #[test]
    fn test_query_aliases() {
        assert_eq!(normalize_query("  RasPi "), "raspberry");
        assert_eq!(normalize_query("rpi"), "raspberry");
        assert_eq!(normalize_query("rpi lite"), "rpi lite");
        assert_eq!(normalize_query(""), "");
    }

    #[test]
    fn test_search_matches_all_terms_across_fields() {
        let items = vec![
            named("rpi-os-lite", "Raspberry Pi OS Lite", "No desktop"),
            named("rpi-os-full", "Raspberry Pi OS", "With desktop and apps"),
            named("ubuntu-server", "Ubuntu Server", "For Raspberry Pi 5"),
        ];

        let ids = |found: Vec<CatalogItem>| found.into_iter().map(|i| i.id).collect::<Vec<_>>();

        assert_eq!(
            ids(search(items.clone(), &normalize_query("raspi"))),
            ["rpi-os-lite", "rpi-os-full", "ubuntu-server"]
        );
        assert_eq!(ids(search(items.clone(), "raspberry desktop")), ["rpi-os-lite", "rpi-os-full"]);
        assert_eq!(ids(search(items.clone(), "server")), ["ubuntu-server"]);
        assert_eq!(ids(search(items.clone(), "os-full")), ["rpi-os-full"]);
        assert!(search(items.clone(), "windows").is_empty());
        assert_eq!(search(items, "").len(), 3);
    }

    #[test]
    fn test_static_catalog() {
        let catalog = StaticCatalog::default().with("a", "http://h/a.img", None);
        assert!(catalog.lookup("a").unwrap().is_some());
        assert!(catalog.lookup("b").unwrap().is_none());
    }
}
