use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::database::repo::DocumentStore;
use crate::database::schema::{sanitize, CategoryRecord, ImageRecord, SearchLogEntry};
use crate::error::Result;

pub const DEFAULT_SEARCH_LIMIT: usize = 6;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStat {
    pub name: String,
    pub image_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub total_categories: usize,
    pub total_images: usize,
    pub categories: Vec<CategoryStat>,
}

pub fn search(store: &mut DocumentStore, query: &str, limit: usize) -> Result<Vec<ImageRecord>> {
    search_with_rng(store, query, limit, &mut rand::thread_rng())
}

/// Case-insensitive substring match on the category name. More than `limit`
/// matches are cut down to a uniform random sample of `limit` distinct records.
/// Every call appends one entry to the search history, counting what was returned.
pub fn search_with_rng<R: Rng + ?Sized>(
    store: &mut DocumentStore,
    query: &str,
    limit: usize,
    rng: &mut R,
) -> Result<Vec<ImageRecord>> {
    let needle = sanitize(&query.to_lowercase());

    let matches: Vec<ImageRecord> =
        store.find(|image: &ImageRecord| image.category.to_lowercase().contains(&needle))?;

    let results = if matches.len() > limit {
        matches.choose_multiple(rng, limit).cloned().collect()
    } else {
        matches
    };

    store.insert_one(&SearchLogEntry::new(&needle, results.len()))?;
    Ok(results)
}

/// Most recent searches first, at most `limit` of them.
pub fn history(store: &DocumentStore, limit: usize) -> Result<Vec<SearchLogEntry>> {
    let mut entries: Vec<SearchLogEntry> = store.all()?;
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries.truncate(limit);
    Ok(entries)
}

pub fn list_categories(store: &DocumentStore) -> Result<Vec<String>> {
    let categories: Vec<CategoryRecord> = store.all()?;
    Ok(categories.into_iter().map(|c| c.display_name).collect())
}

pub fn stats(store: &DocumentStore) -> Result<StatsSummary> {
    let categories: Vec<CategoryRecord> = store.all()?;
    Ok(StatsSummary {
        total_categories: categories.len(),
        total_images: categories.iter().map(|c| c.image_count).sum(),
        categories: categories
            .into_iter()
            .map(|c| CategoryStat { name: c.display_name, image_count: c.image_count })
            .collect(),
    })
}
