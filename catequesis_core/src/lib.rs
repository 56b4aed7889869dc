#![forbid(unsafe_code)]

//! Core domain model and business logic for parish catechesis enrollment.
//!
//! This crate provides:
//! - Domain types (parishes, levels, periods, groups, catechumens, enrollments)
//! - Catalog management
//! - Enrollment engine, progression tracking and sacrament certificates
//! - Persistence (registry store, event journal)
//! - Bounded, cached reports with CSV export

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod registry;
pub mod enrollment;
pub mod progression;
pub mod certificates;
pub mod store;
pub mod journal;
pub mod reporting;
pub mod office;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_catalog, get_default_catalog};
pub use config::Config;
pub use enrollment::NewGroup;
pub use certificates::{issue_certificate, verify_certificate};
pub use store::{JsonStateStore, MemoryStore, RetryPolicy, StateStore};
pub use journal::{DomainEvent, EventSink, JsonlEventSink, NullSink};
pub use reporting::{Page, Report, ReportKind, ReportQuery, ReportRows};
pub use office::Office;
