use crate::error::Result;
use crate::file_record::FileRecord;
use crate::filter::PathFilterSet;

/// Source of mapping rows. Rows come back ordered by their primary key so
/// the restore pipeline plans archives deterministically in backup order.
pub trait MappingStore: Send {
    fn file_records(&self, filters: &PathFilterSet) -> Result<Vec<FileRecord>>;
}
