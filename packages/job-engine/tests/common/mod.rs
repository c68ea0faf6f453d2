//! Common test utilities for scheduler integration tests
//!
//! This module provides shared test infrastructure: recording jobs, gates
//! that hold a job body until the test releases it, and helpers that bound
//! every wait with a timeout.

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod mocks;

pub use mocks::*;
