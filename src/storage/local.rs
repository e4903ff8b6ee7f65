// src/storage/local.rs

//! Local filesystem storage implementation.
//!
//! Tables are CSV files (UTF-8, RFC 4180 quoting) named `{key}.csv` under the
//! root directory. Every write goes to a temporary file that is renamed over
//! the target, so a reader never sees a half-written table.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use encoding_rs::EUC_KR;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Table;
use crate::storage::TableStorage;
use crate::utils::csv;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Path of a table file.
    pub fn table_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(format!("{key}.csv"))
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
        Self::ensure_dir(path).await?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            AppError::storage(path.display().to_string(), format!("rename failed: {e}"))
        })?;
        Ok(())
    }

    /// Read text, returning None if the file doesn't exist.
    ///
    /// UTF-8 (with or without BOM) is tried first, then CP949.
    async fn read_path(path: &Path) -> Result<Option<String>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => decode_text(bytes).map(Some).ok_or_else(|| {
                AppError::storage(path.display().to_string(), "neither UTF-8 nor CP949")
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read a CSV file anywhere on disk.
    pub async fn read_csv_file(path: &Path) -> Result<Table> {
        match Self::read_path(path).await? {
            Some(text) => Ok(csv::parse_table(&text)),
            None => Err(AppError::storage(
                path.display().to_string(),
                "file does not exist",
            )),
        }
    }

    /// Write a CSV file anywhere on disk.
    pub async fn write_csv_file(path: &Path, table: &Table) -> Result<()> {
        Self::write_bytes(path, csv::table_to_string(table).as_bytes()).await
    }
}

/// Decode spreadsheet exports, which arrive as UTF-8 or CP949.
fn decode_text(bytes: Vec<u8>) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            let bytes = e.into_bytes();
            // EUC_KR in encoding_rs is the windows-949 superset
            EUC_KR
                .decode_without_bom_handling_and_without_replacement(&bytes)
                .map(|text| text.into_owned())
        }
    }
}

#[async_trait]
impl TableStorage for LocalStorage {
    async fn load_table(&self, key: &str) -> Result<Option<Table>> {
        let path = self.table_path(key);
        Ok(Self::read_path(&path).await?.map(|text| csv::parse_table(&text)))
    }

    async fn write_table(&self, key: &str, table: &Table) -> Result<()> {
        let path = self.table_path(key);
        Self::write_csv_file(&path, table).await?;
        log::debug!("Wrote {} rows to {}", table.len(), path.display());
        Ok(())
    }

    async fn read_text(&self, key: &str) -> Result<Option<String>> {
        Self::read_path(&self.path(key)).await
    }

    async fn write_text(&self, key: &str, text: &str) -> Result<()> {
        Self::write_bytes(&self.path(key), text.as_bytes()).await
    }
}
