//! Cache module for storing fetched payloads to disk
//!
//! This module provides a time-bounded cache that persists payloads to the
//! filesystem with a fixed TTL per cache instance. Expired entries are never
//! served: they are treated as absent and removed on the read that finds them,
//! or by an explicit sweep.

mod clock;
mod timed;

pub use clock::{Clock, ManualClock, SystemClock};
pub use timed::{TimedCache, DEFAULT_TTL};
