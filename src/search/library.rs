use std::path::{Component, Path, PathBuf};
use tracing::{error, info};

use crate::database::repo::DocumentStore;
use crate::database::schema::{ImageRecord, SearchLogEntry, Table};
use crate::error::{Error, Result};
use crate::ingest::scanner::{self, IndexReport};
use crate::search::query::{self, StatsSummary, DEFAULT_HISTORY_LIMIT, DEFAULT_SEARCH_LIMIT};

/// Owns the document store and the dataset directory. Lookups never fail from
/// the caller's point of view: errors are logged and become empty results.
pub struct ImageLibrary {
    store: DocumentStore,
    base_dir: PathBuf,
}

impl ImageLibrary {
    pub fn open(base_dir: impl Into<PathBuf>, db_path: impl AsRef<Path>) -> Result<Self> {
        let store = DocumentStore::open(db_path)?;
        info!(
            "Opened {:?}: {} images, {} searches logged",
            store.path(),
            store.len(Table::Images),
            store.len(Table::SearchHistory)
        );
        Ok(Self { store, base_dir: base_dir.into() })
    }

    pub fn reindex(&mut self) -> Result<IndexReport> {
        info!("Indexing images from {:?} into {:?}", self.base_dir, self.store.path());
        scanner::index_all(&mut self.store, &self.base_dir)
    }

    pub fn search(&mut self, query: &str) -> Vec<ImageRecord> {
        self.search_limited(query, DEFAULT_SEARCH_LIMIT)
    }

    pub fn search_limited(&mut self, query: &str, limit: usize) -> Vec<ImageRecord> {
        match query::search(&mut self.store, query, limit) {
            Ok(results) => {
                info!("Search {:?} returned {} images", query, results.len());
                results
            }
            Err(e) => {
                error!("Search error: {}", e);
                Vec::new()
            }
        }
    }

    pub fn history(&self) -> Vec<SearchLogEntry> {
        self.history_limited(DEFAULT_HISTORY_LIMIT)
    }

    pub fn history_limited(&self, limit: usize) -> Vec<SearchLogEntry> {
        query::history(&self.store, limit).unwrap_or_else(|e| {
            error!("Error getting search history: {}", e);
            Vec::new()
        })
    }

    pub fn categories(&self) -> Vec<String> {
        query::list_categories(&self.store).unwrap_or_else(|e| {
            error!("Error getting categories: {}", e);
            Vec::new()
        })
    }

    pub fn stats(&self) -> StatsSummary {
        query::stats(&self.store).unwrap_or_else(|e| {
            error!("Error getting stats: {}", e);
            StatsSummary::default()
        })
    }

    /// Path of `category/filename` under the dataset directory. Components that
    /// would leave that directory are rejected; a missing file is `ImageNotFound`.
    pub fn resolve_image_path(&self, category: &str, filename: &str) -> Result<PathBuf> {
        for part in [category, filename] {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => {}
                _ => return Err(Error::InvalidPath(part.to_string())),
            }
        }

        let path = self.base_dir.join(category).join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::ImageNotFound(path))
        }
    }
}
