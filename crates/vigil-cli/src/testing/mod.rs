//! Conformance suite infrastructure
//!
//! The suite is compiled into the binary; each case runs on its own
//! environment so cases can be spread across worker threads.

pub mod reporter;
pub mod runner;
pub mod suite;

pub use reporter::{json_summary, TestReporter};
pub use runner::TestRunner;
pub use suite::TestSuite;
