use std::path::Path;

use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use crate::error::Result;
use crate::file_record::FileRecord;
use crate::filter::PathFilterSet;
use crate::interface::MappingStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS `file_info_tb` (\
                      `key` INTEGER PRIMARY KEY AUTOINCREMENT, \
                      `shareName` TEXT, \
                      `basePath` TEXT, \
                      `archiveID` TEXT, \
                      `fileSize` INTEGER)";

/// Mapping store backed by the sqlite file the backup agent writes. The
/// restore flow only ever reads it; `create` exists for tests and tooling
/// that need to seed a mapping database.
pub struct SqliteMappingStore {
    conn: Connection,
}

impl SqliteMappingStore {
    /// Opens an existing mapping database read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Creates the database (and schema) at `path`, opening it read-write.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn insert_record(
        &self,
        share_name: &str,
        base_path: &str,
        archive_id: &str,
        file_size: u64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO `file_info_tb` (shareName, basePath, archiveID, fileSize) VALUES (?1, ?2, ?3, ?4)",
            params![share_name, base_path, archive_id, file_size as i64],
        )?;
        Ok(())
    }
}

impl MappingStore for SqliteMappingStore {
    fn file_records(&self, filters: &PathFilterSet) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT `key`, shareName, basePath, archiveID, fileSize \
             FROM `file_info_tb` ORDER BY `key` ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FileRecord {
                key: row.get(0)?,
                share_name: row.get(1)?,
                base_path: row.get(2)?,
                archive_id: row.get(3)?,
                file_size: row.get::<_, i64>(4)? as u64,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            let record = row?;
            if filters.matches(&record.base_path) {
                records.push(record);
            }
        }
        debug!(count = records.len(), "Loaded mapping rows");
        Ok(records)
    }
}
