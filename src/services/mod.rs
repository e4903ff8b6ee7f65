// src/services/mod.rs

//! Services that talk to the catalog.

pub mod probe;
pub mod shapes;

pub use probe::{EndpointProbe, ProbeOutcome, RecordSource};
pub use shapes::{ParsedPage, ResponseShape};
