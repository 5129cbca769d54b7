//! # leadsync Testkit
//!
//! Test utilities for leadsync.
//!
//! This crate provides:
//! - Contact and lead builders
//! - A harness wiring a sync job to an in-memory remote store
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use leadsync_testkit::prelude::*;
//!
//! #[test]
//! fn creates_new_contact() {
//!     let mut harness = TestHarness::new(test_config());
//!     let summary = harness.job.run(&[contact("1", "a@x.com")], SyncMode::Incremental).unwrap();
//!     assert_eq!(summary.counts.sent, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use leadsync_engine::SyncMode;
}

pub use fixtures::*;
pub use generators::*;
