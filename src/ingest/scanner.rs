use std::path::Path;
use walkdir::WalkDir;
use tracing::{info, warn, error};

use crate::database::repo::DocumentStore;
use crate::database::schema::{display_name, CategoryRecord, ImageRecord, Table};
use crate::error::Result;

const IMAGE_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub categories: usize,
    pub images: usize,
    pub skipped: usize,
}

/// Rebuilds the images and categories tables from the category folders under `base_dir`.
/// If the run fails as a whole both tables are left empty.
pub fn index_all(store: &mut DocumentStore, base_dir: &Path) -> Result<IndexReport> {
    match index_categories(store, base_dir) {
        Ok(report) => {
            info!(
                "Indexing completed: {} categories, {} images, {} folders skipped",
                report.categories, report.images, report.skipped
            );
            Ok(report)
        }
        Err(e) => {
            error!("Error during indexing of {:?}: {}", base_dir, e);
            for table in [Table::Images, Table::Categories] {
                if let Err(reset_err) = store.reset(table) {
                    error!("Failed to clear {} after indexing error: {}", table.name(), reset_err);
                }
            }
            Err(e)
        }
    }
}

fn index_categories(store: &mut DocumentStore, base_dir: &Path) -> Result<IndexReport> {
    info!("Starting indexing from: {:?}", base_dir);
    let mut report = IndexReport::default();

    let mut folders = Vec::new();
    let walker = WalkDir::new(base_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        match entry {
            Ok(entry) => folders.push(entry),
            // Failing to read the base directory itself aborts the run.
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                report.skipped += 1;
            }
        }
    }

    store.reset(Table::Images)?;
    store.reset(Table::Categories)?;

    for entry in folders {
        if !entry.path().is_dir() {
            continue;
        }

        let folder = entry.file_name().to_string_lossy().into_owned();
        match index_category(store, entry.path(), &folder) {
            Ok(0) => {}
            Ok(count) => {
                report.categories += 1;
                report.images += count;
            }
            Err(e) => {
                warn!("Error indexing {}: {}", folder, e);
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}

/// Indexes one category folder and returns the number of images stored.
/// A folder is stored whole or not at all.
fn index_category(store: &mut DocumentStore, folder_path: &Path, folder: &str) -> Result<usize> {
    let category = display_name(folder);
    info!("Processing category: {}", category);

    let mut images = Vec::new();
    // Links are followed, so a dangling one fails the folder.
    let walker = WalkDir::new(folder_path)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy();
        if is_image_file(&filename) && entry.file_type().is_file() {
            images.push(ImageRecord::new(folder, &category, &filename));
        }
    }

    // Folders without images leave no trace in either table.
    if images.is_empty() {
        return Ok(0);
    }

    let checkpoint = store.checkpoint();
    let stored = store
        .insert_many(&images)
        .and_then(|()| store.insert_one(&CategoryRecord::new(folder, images.len())));
    if let Err(e) = stored {
        store.rollback(&checkpoint);
        return Err(e);
    }

    info!("Indexed {} images for category: {}", images.len(), category);
    Ok(images.len())
}

fn is_image_file(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}
