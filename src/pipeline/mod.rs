//! Pipeline stages and run entry points.
//!
//! - `cursor`: serial-id scan with the consecutive-miss stop rule
//! - `normalize`: raw records into canonical rows
//! - `reconcile`: merge canonical rows into the store
//! - `views`: recompute filter views from the store
//! - `run`: one invocation tying the stages together

pub mod cursor;
pub mod normalize;
pub mod reconcile;
pub mod run;
pub mod views;

pub use cursor::{ScanOptions, ScanResult, scan};
pub use normalize::{NormalizeReport, Normalizer};
pub use reconcile::{ReconcileReport, reconcile};
pub use run::{
    RunContext, RunLock, RunSummary, clean_file, crawl_only, merge_file, regenerate_views, run,
};
pub use views::{MaterializedView, PremiumFunnel, ViewDelta, ViewMatcher, materialize};
