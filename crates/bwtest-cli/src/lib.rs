//! Library half of the `bwtest` binary: transaction list building and result
//! reporting, kept out of `main.rs` so they can be tested directly.

pub mod builder;
pub mod report;

pub use builder::{BuildError, TransactionBuilder, TransactionRequest};
pub use report::{Report, ReportFormat, write_topology};
