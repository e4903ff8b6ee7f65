// src/models/mod.rs

//! Domain models for the crawl-and-reconcile engine.
//!
//! Records flow from [`RawRecord`] (as fetched) to [`CanonicalRow`] (cleaned)
//! to [`StoredRow`] (merged into a [`Store`]).

pub mod columns;
mod config;
mod record;
mod row;
mod store;
mod table;
mod view;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, CursorConfig, EndpointTemplate, NormalizeConfig, PremiumCriteria,
    StoreConfig,
};
pub use record::{FETCHED_AT_FORMAT, RawRecord, SiteEntry, raw_layout};
pub use row::{CanonicalRow, MonthStamp, Status};
pub use store::{Annotation, Store, StoredRow, canonical_layout, parse_key};
pub use table::Table;
pub use view::{ViewDefinition, ViewPredicate};
