//! Background job definitions
//!
//! Each job implements [`resonance_job_engine::Job`] and runs on one of the
//! scheduler's lanes.

pub mod library_scan;

pub use library_scan::LibraryScanJob;
