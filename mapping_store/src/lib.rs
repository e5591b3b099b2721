mod error;
mod file_record;
mod filter;
mod interface;
mod sqlite_store;

pub use error::{MappingStoreError, Result};
pub use file_record::{FileRecord, ZERO_SIZE_ARCHIVE_ID};
pub use filter::PathFilterSet;
pub use interface::MappingStore;
pub use sqlite_store::SqliteMappingStore;
