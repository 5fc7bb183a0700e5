//! mastertab-daemon library: native collaborators for the election.
//!
//! A directory-backed shared store, a file-backed identity store and a tokio
//! scheduler, exposed as a library so integration tests can use them.

pub mod file_store;
pub mod identity;
pub mod scheduler;

// Re-export key types for convenience
pub use file_store::{FileStore, FileStoreOptions};
pub use identity::FileIdentityStore;
pub use scheduler::TokioScheduler;
