pub mod error;
pub mod memory;
pub mod sqllite;
pub mod store;

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use error::StoreError;
use memory::MemoryStore;
use sqllite::SqliteStore;
use store::RadarStore;

#[derive(PartialEq, Debug)]
#[allow(non_camel_case_types)]
pub enum StoreFormat {
    SQLITE(PathBuf),
    MEMORY,
}

impl StoreFormat {
    pub fn create_from_file<P>(path_arg: P) -> Result<StoreFormat, StoreError>
    where
        P: AsRef<Path>,
    {
        let path = path_arg.as_ref();
        match path.extension().and_then(OsStr::to_str) {
            Some("sqlite") | Some("db") => Ok(StoreFormat::SQLITE(path.to_path_buf())),
            _ => Err(StoreError::UnknownFormat(path.display().to_string())),
        }
    }

    pub async fn to_store(&self) -> Result<Arc<dyn RadarStore>, StoreError> {
        use StoreFormat::*;
        match self {
            SQLITE(path_buf) => Ok(Arc::new(SqliteStore::create_from_file(path_buf).await?)),
            MEMORY => Ok(Arc::new(MemoryStore::new())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::StoreFormat;

    #[test]
    fn sqlite_format_matching() {
        for valid in ["radar.sqlite", "radar.db"] {
            assert_eq!(
                StoreFormat::create_from_file(valid).unwrap(),
                StoreFormat::SQLITE(valid.into())
            );
        }
    }

    #[test]
    fn format_not_matching() {
        let invalid = vec!["foop.json", "farp", "feep.txt"];

        for i in invalid {
            assert!(StoreFormat::create_from_file(i).is_err());
        }
    }
}
