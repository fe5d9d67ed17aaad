//! RxHub Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the RxHub workspace:
//!
//! - **Error Handling**: the workspace-wide error and result types
//! - **Checksums**: payload integrity digests
//! - **Logging**: tracing subscriber bootstrap shared by every binary
//! - **Types**: shared domain types

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, RxhubError};
