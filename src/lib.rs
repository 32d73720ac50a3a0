//! origin-cache library
//!
//! Fetch/cache core of an aggregation service: a time-bounded disk cache, a
//! network fetcher, a cache-replaying fetcher and the scoped service registry
//! that wires them together.

pub mod bootstrap;
pub mod cache;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod registry;
pub mod vault;

pub use error::{Error, Result};
