//! Catalog loading seam and the atomic-swap slot shared between runs.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;

use crate::catalog::catalog::Catalog;
use crate::catalog::error::{CatalogError, Result};

/// Where catalog blobs come from; load/refresh policy lives with the caller.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn load(&self) -> Result<Catalog>;
}

/// Reads the catalog blob wholesale from a file.
#[derive(Debug, Clone)]
pub struct FileCatalogSource {
    path: PathBuf,
}

impl FileCatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for FileCatalogSource {
    async fn load(&self) -> Result<Catalog> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| CatalogError::CatalogUnavailable {
                reason: format!("{}: {e}", self.path.display()),
            })?;
        let catalog = Catalog::from_bytes(&bytes)?;
        info!(
            path = %self.path.display(),
            version = catalog.version(),
            apis = catalog.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }
}

/// Holds the current catalog instance for concurrent analysis runs.
///
/// A refresh builds a whole new [`Catalog`] and swaps the `Arc`; readers
/// that cloned the previous instance keep seeing it unchanged. There are no
/// in-place edits and no partial-update visibility.
#[derive(Debug)]
pub struct CatalogSlot {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogSlot {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Clone out the current instance.
    pub fn get(&self) -> Arc<Catalog> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the current instance atomically.
    pub fn swap(&self, catalog: Catalog) {
        let replacement = Arc::new(catalog);
        match self.current.write() {
            Ok(mut guard) => *guard = replacement,
            Err(poisoned) => *poisoned.into_inner() = replacement,
        }
    }

    /// Load a fresh instance from `source` and swap it in. A failed load
    /// leaves the current instance untouched.
    pub async fn refresh(&self, source: &dyn CatalogSource) -> Result<()> {
        let catalog = source.load().await?;
        self.swap(catalog);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::store::CatalogDocument;
    use chrono::Utc;

    fn catalog(version: &str) -> Catalog {
        Catalog::from_document(CatalogDocument {
            version: version.to_string(),
            built: Utc::now(),
            framework_assemblies: Vec::new(),
            apis: Vec::new(),
        })
    }

    #[test]
    fn test_slot_swap_is_whole_instance() {
        let slot = CatalogSlot::new(catalog("one"));
        let before = slot.get();
        slot.swap(catalog("two"));
        let after = slot.get();

        // The old reader still sees its instance; new readers see the swap.
        assert_eq!(before.version(), "one");
        assert_eq!(after.version(), "two");
    }

    #[tokio::test]
    async fn test_missing_file_is_catalog_unavailable() {
        let source = FileCatalogSource::new("/nonexistent/catalog.bin");
        let error = source.load().await.unwrap_err();
        assert!(matches!(error, CatalogError::CatalogUnavailable { .. }));
    }
}
