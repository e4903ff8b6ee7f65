// src/storage/mod.rs

//! Table storage abstractions.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml           # Run configuration
//! ├── trials.csv            # Main store
//! ├── views/                # One table per filter view
//! │   ├── filtered_premium.csv
//! │   └── filtered_recruiting.csv
//! ├── outputs/              # Raw and cleaned batch checkpoints
//! │   ├── increment_20250912_103000.csv
//! │   └── increment_20250912_103000_clean.csv
//! └── last_run.json         # Summary of the last run
//! ```

pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Table;

// Re-export for convenience
pub use local::LocalStorage;

/// Directory holding the view tables.
pub const VIEWS_DIR: &str = "views";

/// Storage key of a view table.
pub fn view_key(name: &str) -> String {
    format!("{VIEWS_DIR}/{name}")
}

/// Trait for table storage backends.
///
/// Keys are relative names such as `trials` or `views/filtered_premium`;
/// the backend decides the file format.
#[async_trait]
pub trait TableStorage: Send + Sync {
    /// Load a table, returning None if it does not exist yet.
    async fn load_table(&self, key: &str) -> Result<Option<Table>>;

    /// Replace a table as a whole.
    async fn write_table(&self, key: &str, table: &Table) -> Result<()>;

    /// Read a text document, returning None if it does not exist.
    async fn read_text(&self, key: &str) -> Result<Option<String>>;

    /// Replace a text document.
    async fn write_text(&self, key: &str, text: &str) -> Result<()>;
}
