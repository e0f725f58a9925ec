use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::database::schema::{Document, Table};
use crate::error::Result;

/// Records are written to disk in chunks of this size.
pub const BATCH_SIZE: usize = 100;

/// Table name -> (document id -> record). Ids start at 1 and follow insertion order.
type Tables = BTreeMap<String, BTreeMap<u64, Value>>;

/// Last document id of each table at some point in time.
#[derive(Debug, Clone)]
pub struct Checkpoint(BTreeMap<String, u64>);

/// JSON-file backed document store holding the images, categories and
/// search_history tables. Every mutation rewrites the whole file.
pub struct DocumentStore {
    path: PathBuf,
    tables: Tables,
}

impl DocumentStore {
    /// Opens the store at `path`. A file that is not a valid store document is
    /// removed and the store starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = match fs::read(&path) {
            Ok(raw) => match serde_json::from_slice::<Tables>(&raw) {
                Ok(tables) => tables,
                Err(e) => {
                    warn!("Corrupted database found at {:?} ({}), removing", path, e);
                    fs::remove_file(&path)?;
                    Tables::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::new(),
            Err(e) => return Err(e.into()),
        };

        let mut store = Self { path, tables };
        for table in Table::ALL {
            store.tables.entry(table.name().to_string()).or_default();
        }
        store.persist()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes every record from `table`. If the save fails the records stay.
    pub fn reset(&mut self, table: Table) -> Result<()> {
        let previous = std::mem::take(self.table_mut(table));
        if let Err(e) = self.persist() {
            *self.table_mut(table) = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn insert_one<T: Document>(&mut self, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let checkpoint = self.checkpoint();
        self.push(T::TABLE, value);
        if let Err(e) = self.persist() {
            self.truncate_to(&checkpoint);
            return Err(e);
        }
        Ok(())
    }

    /// Appends `records` in order, flushing to disk every `BATCH_SIZE` records.
    /// Either all records are kept or, on any failure, none of them.
    pub fn insert_many<T: Document>(&mut self, records: &[T]) -> Result<()> {
        let checkpoint = self.checkpoint();
        if let Err(e) = self.append_chunks(records) {
            self.rollback(&checkpoint);
            return Err(e);
        }
        Ok(())
    }

    /// Marks the current end of every table, for a later `rollback`.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(
            self.tables
                .iter()
                .map(|(name, docs)| (name.clone(), docs.keys().next_back().copied().unwrap_or(0)))
                .collect(),
        )
    }

    /// Drops every record appended since `checkpoint` and saves the result.
    /// Only appends are undone; a reset in between is not.
    pub fn rollback(&mut self, checkpoint: &Checkpoint) {
        self.truncate_to(checkpoint);
        if let Err(e) = self.persist() {
            warn!("Failed to save rolled back store {:?}: {}", self.path, e);
        }
    }

    /// Every record of `T`'s table matching `predicate`. No ordering is promised.
    pub fn find<T, P>(&self, predicate: P) -> Result<Vec<T>>
    where
        T: Document,
        P: Fn(&T) -> bool,
    {
        let mut found = Vec::new();
        for value in self.values(T::TABLE) {
            let record: T = serde_json::from_value(value.clone())?;
            if predicate(&record) {
                found.push(record);
            }
        }
        Ok(found)
    }

    pub fn all<T: Document>(&self) -> Result<Vec<T>> {
        self.find(|_: &T| true)
    }

    pub fn len(&self, table: Table) -> usize {
        self.tables.get(table.name()).map_or(0, BTreeMap::len)
    }

    fn values(&self, table: Table) -> impl Iterator<Item = &Value> {
        self.tables.get(table.name()).into_iter().flat_map(BTreeMap::values)
    }

    fn table_mut(&mut self, table: Table) -> &mut BTreeMap<u64, Value> {
        self.tables.entry(table.name().to_string()).or_default()
    }

    fn append_chunks<T: Document>(&mut self, records: &[T]) -> Result<()> {
        for chunk in records.chunks(BATCH_SIZE) {
            for record in chunk {
                let value = serde_json::to_value(record)?;
                self.push(T::TABLE, value);
            }
            self.persist()?;
            debug!("Flushed {} records into {}", chunk.len(), T::TABLE.name());
        }
        Ok(())
    }

    fn truncate_to(&mut self, checkpoint: &Checkpoint) {
        for (name, docs) in self.tables.iter_mut() {
            let last = checkpoint.0.get(name).copied().unwrap_or(0);
            docs.retain(|id, _| *id <= last);
        }
    }

    fn push(&mut self, table: Table, value: Value) {
        let docs = self.table_mut(table);
        let next_id = docs.keys().next_back().map_or(1, |id| id + 1);
        docs.insert(next_id, value);
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write beside the target and rename, so a crash never leaves half a document.
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(fs::File::create(&tmp)?);
            serde_json::to_writer(&mut writer, &self.tables)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::{CategoryRecord, ImageRecord, SearchLogEntry};
    use tempfile::TempDir;

    fn image(folder: &str, name: &str) -> ImageRecord {
        ImageRecord::new(folder, &crate::database::schema::display_name(folder), name)
    }

    #[test]
    fn test_open_missing_file_creates_empty_store() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("images_db.json");

        let store = DocumentStore::open(&path)?;
        assert!(path.exists());
        for table in Table::ALL {
            assert_eq!(store.len(table), 0);
        }
        Ok(())
    }

    #[test]
    fn test_corrupted_file_is_discarded() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("images_db.json");
        fs::write(&path, "{\"images\": {\"1\": {\"filename\": ")?;

        let store = DocumentStore::open(&path)?;
        assert_eq!(store.len(Table::Images), 0);

        // The file was recreated as a valid, empty document.
        let raw = fs::read_to_string(&path)?;
        let reparsed: Tables = serde_json::from_str(&raw)?;
        assert!(reparsed.values().all(BTreeMap::is_empty));
        Ok(())
    }

    #[test]
    fn test_wrong_shape_is_discarded() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("images_db.json");
        let cases: [&[u8]; 3] = [b"[1, 2, 3]", b"", b"\xff\xfe{}"];
        for garbage in cases {
            fs::write(&path, garbage)?;
            let store = DocumentStore::open(&path)?;
            assert_eq!(store.len(Table::Images), 0);
        }
        Ok(())
    }

    #[test]
    fn test_insert_many_preserves_order_across_batches() -> Result<()> {
        let dir = TempDir::new()?;
        let mut store = DocumentStore::open(dir.path().join("db.json"))?;

        let records: Vec<ImageRecord> = (0..250)
            .map(|i| image("001.dog", &format!("{:03}.jpg", i)))
            .collect();
        store.insert_many(&records)?;

        let stored: Vec<ImageRecord> = store.all()?;
        assert_eq!(stored.len(), 250);
        assert_eq!(stored, records);
        Ok(())
    }

    #[test]
    fn test_records_survive_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("db.json");
        {
            let mut store = DocumentStore::open(&path)?;
            store.insert_one(&CategoryRecord::new("001.dog", 2))?;
            store.insert_one(&SearchLogEntry::new("dog", 2))?;
        }

        let store = DocumentStore::open(&path)?;
        let categories: Vec<CategoryRecord> = store.all()?;
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].display_name, "dog");
        assert_eq!(store.len(Table::SearchHistory), 1);
        Ok(())
    }

    #[test]
    fn test_reset_clears_only_target_table() -> Result<()> {
        let dir = TempDir::new()?;
        let mut store = DocumentStore::open(dir.path().join("db.json"))?;
        store.insert_one(&image("001.dog", "a.jpg"))?;
        store.insert_one(&CategoryRecord::new("001.dog", 1))?;

        store.reset(Table::Images)?;
        store.reset(Table::Images)?;

        assert_eq!(store.len(Table::Images), 0);
        assert_eq!(store.len(Table::Categories), 1);
        Ok(())
    }

    #[test]
    fn test_find_filters_by_predicate() -> Result<()> {
        let dir = TempDir::new()?;
        let mut store = DocumentStore::open(dir.path().join("db.json"))?;
        store.insert_many(&[
            image("001.dog", "a.jpg"),
            image("002.cat", "b.jpg"),
            image("001.dog", "c.png"),
        ])?;

        let dogs: Vec<ImageRecord> = store.find(|i: &ImageRecord| i.category == "dog")?;
        assert_eq!(dogs.len(), 2);
        assert!(dogs.iter().all(|i| i.folder == "001.dog"));
        Ok(())
    }

    #[test]
    fn test_ids_continue_after_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("db.json");
        {
            let mut store = DocumentStore::open(&path)?;
            store.insert_one(&SearchLogEntry::new("first", 0))?;
        }
        let mut store = DocumentStore::open(&path)?;
        store.insert_one(&SearchLogEntry::new("second", 0))?;

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        let history = raw["search_history"].as_object().map(|m| m.len());
        assert_eq!(history, Some(2));
        assert_eq!(raw["search_history"]["2"]["query"], "second");
        Ok(())
    }

    /// A directory squatting on the temp file name makes every save fail.
    fn block_saves(path: &Path) -> Result<PathBuf> {
        let tmp = path.with_extension("json.tmp");
        fs::create_dir(&tmp)?;
        Ok(tmp)
    }

    #[test]
    fn test_failed_insert_leaves_no_trace() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("db.json");
        let mut store = DocumentStore::open(&path)?;
        store.insert_one(&image("002.cat", "c.jpg"))?;

        let blocker = block_saves(&path)?;
        assert!(store.insert_many(&[image("001.dog", "a.jpg")]).is_err());
        assert!(store.insert_one(&CategoryRecord::new("001.dog", 1)).is_err());
        assert_eq!(store.len(Table::Images), 1);
        assert_eq!(store.len(Table::Categories), 0);

        // A later successful save must not carry the rejected records to disk.
        fs::remove_dir(&blocker)?;
        store.insert_one(&SearchLogEntry::new("dog", 0))?;

        let reopened = DocumentStore::open(&path)?;
        let images: Vec<ImageRecord> = reopened.all()?;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].category, "cat");
        assert_eq!(reopened.len(Table::Categories), 0);
        assert_eq!(reopened.len(Table::SearchHistory), 1);
        Ok(())
    }

    #[test]
    fn test_rollback_drops_flushed_chunks() -> Result<()> {
        let dir = TempDir::new()?;
        let mut store = DocumentStore::open(dir.path().join("db.json"))?;
        let checkpoint = store.checkpoint();

        let records: Vec<ImageRecord> = (0..BATCH_SIZE * 2)
            .map(|i| image("001.dog", &format!("{}.jpg", i)))
            .collect();
        store.insert_many(&records)?;
        assert_eq!(store.len(Table::Images), BATCH_SIZE * 2);

        store.rollback(&checkpoint);
        assert_eq!(store.len(Table::Images), 0);
        let reopened = DocumentStore::open(store.path())?;
        assert_eq!(reopened.len(Table::Images), 0);
        Ok(())
    }

    #[test]
    fn test_failed_reset_keeps_records() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("db.json");
        let mut store = DocumentStore::open(&path)?;
        store.insert_one(&image("001.dog", "a.jpg"))?;

        let blocker = block_saves(&path)?;
        assert!(store.reset(Table::Images).is_err());
        assert_eq!(store.len(Table::Images), 1);

        fs::remove_dir(&blocker)?;
        store.reset(Table::Images)?;
        assert_eq!(store.len(Table::Images), 0);
        Ok(())
    }
}
