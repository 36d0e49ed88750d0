//! Core engine for solar savings analysis: ingests a sales proposal and a
//! utility bill, extracts structured fields through a tiered fallback chain
//! (AI -> patterns -> synthesis), reconciles them with roof-potential,
//! production-simulation and incentive estimates, and produces a complete
//! financial and environmental forecast even when inputs are sparse or
//! external services are down.
//!
//! Transport, auth and presentation live outside this crate; the boundary
//! types are [`models::UploadedDocument`] going in and
//! [`models::ResultRecord`] coming out.

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
pub use services::analysis::AnalysisEngine;
pub use services::processor::{process_proposal, process_utility_bill};
