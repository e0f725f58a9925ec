use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The logical tables held by the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Images,
    Categories,
    SearchHistory,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Images, Table::Categories, Table::SearchHistory];

    pub fn name(self) -> &'static str {
        match self {
            Table::Images => "images",
            Table::Categories => "categories",
            Table::SearchHistory => "search_history",
        }
    }
}

/// A record type bound to exactly one table.
pub trait Document: Serialize + DeserializeOwned {
    const TABLE: Table;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub filename: String,
    pub category: String,
    pub folder: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(folder: &str, category: &str, filename: &str) -> Self {
        let folder = sanitize(folder);
        let filename = sanitize(filename);
        Self {
            file_path: format!("{}/{}", folder, filename),
            category: sanitize(category),
            folder,
            filename,
            created_at: Utc::now(),
        }
    }
}

impl Document for ImageRecord {
    const TABLE: Table = Table::Images;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub folder_name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub image_count: usize,
}

impl CategoryRecord {
    pub fn new(folder_name: &str, image_count: usize) -> Self {
        Self {
            folder_name: sanitize(folder_name),
            display_name: display_name(folder_name),
            created_at: Utc::now(),
            image_count,
        }
    }
}

impl Document for CategoryRecord {
    const TABLE: Table = Table::Categories;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLogEntry {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub results_count: usize,
}

impl SearchLogEntry {
    pub fn new(query: &str, results_count: usize) -> Self {
        Self {
            query: sanitize(query),
            timestamp: Utc::now(),
            results_count,
        }
    }
}

impl Document for SearchLogEntry {
    const TABLE: Table = Table::SearchHistory;
}

/// Keeps printable ASCII only (0x20..=0x7E).
pub fn sanitize(s: &str) -> String {
    s.chars().filter(|c| (' '..='~').contains(c)).collect()
}

/// "042.guitar" -> "guitar". Names without a '.' are only trimmed.
pub fn display_name(folder_name: &str) -> String {
    let name = match folder_name.split_once('.') {
        Some((_, rest)) => rest.trim(),
        None => folder_name.trim(),
    };
    sanitize(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_strips_numeric_prefix() {
        assert_eq!(display_name("042.guitar"), "guitar");
        assert_eq!(display_name("001. hot-air-balloon "), "hot-air-balloon");
        assert_eq!(display_name("airplanes"), "airplanes");
        assert_eq!(display_name("  images "), "images");
        // Only the first separator counts.
        assert_eq!(display_name("1.5.foo"), "5.foo");
    }

    #[test]
    fn test_sanitize_drops_control_and_non_ascii() {
        assert_eq!(sanitize("caf\u{e9}\tbar\n"), "cafbar");
        assert_eq!(sanitize("plain ~text!"), "plain ~text!");
        assert_eq!(sanitize("\u{7f}\u{1b}"), "");
    }

    #[test]
    fn test_image_record_builds_relative_path() {
        let image = ImageRecord::new("001.dog", "dog", "a\u{e9}.jpg");
        assert_eq!(image.filename, "a.jpg");
        assert_eq!(image.file_path, "001.dog/a.jpg");
        assert_eq!(image.category, "dog");
    }

    #[test]
    fn test_category_record_derives_display_name() {
        let category = CategoryRecord::new("257.clutter", 3);
        assert_eq!(category.folder_name, "257.clutter");
        assert_eq!(category.display_name, "clutter");
        assert_eq!(category.image_count, 3);
    }
}
