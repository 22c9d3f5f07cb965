pub mod artifacts;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod lineage;
pub mod reports;
pub mod types;

pub use error::{LineageError, Result};
