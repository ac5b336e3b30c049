//! # structidx Testkit
//!
//! Test utilities for structidx.
//!
//! This crate provides:
//! - In-memory fakes for the parser, file registry and scheduler
//! - Registry fixtures in temporary directories
//! - Property-based test generators using proptest
//! - Concurrent reader/writer stress helpers
//! - Codec test vectors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use structidx_testkit::prelude::*;
//!
//! #[test]
//! fn finds_declarations() {
//!     let kt = functions_key_type(1);
//!     let fixture = TestRegistry::deterministic(vec![kt.declaration()]);
//!     // ... update and query
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fakes;
pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fakes::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
}

pub use fakes::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use vectors::*;
