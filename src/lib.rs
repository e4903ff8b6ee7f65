// src/lib.rs

//! trialcrawl: incremental crawler and store reconciler for a clinical trial catalog

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
