//! Git operations for portsync.

pub mod client;

pub use client::{GitClient, MergeStatus};
