//! portsync core library.
//!
//! This crate provides the components for syncing a downstream ports tree
//! with upstream: configuration, the git repository client, three-way
//! conflict resolution with recovery artifacts, poudriere build verification,
//! tool preflight checks, and the session engine tying them together.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod harness;
pub mod models;
pub mod preflight;
pub mod session;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{MergeRepository, ResolutionDriver, StagingManager};
pub use git::GitClient;
pub use harness::BuildHarness;
pub use session::{SessionOptions, SyncEngine, SyncSession};
