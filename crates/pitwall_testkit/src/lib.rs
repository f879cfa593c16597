//! # Pitwall Testkit
//!
//! Test utilities for Pitwall.
//!
//! This crate provides:
//! - Store fixtures with a manual clock, in memory or on disk
//! - A seeded race day (race, teams, karts, pit-lane config)
//! - Property-based generators for queue operations and inbound records
//! - Invariant assertions over a store
//! - Journal damage helpers for recovery tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pitwall_testkit::prelude::*;
//!
//! #[test]
//! fn queue_stays_contiguous() {
//!     with_temp_store(|store| {
//!         let day = RaceDay::seed(store, 2, 3, 4, 0);
//!         // ... queue operations
//!         assert_queue_invariants(store);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod invariants;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::invariants::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use invariants::*;
