//! Persistent storage collaborators.
//!
//! Every worker talks to storage through these traits. The SQLite
//! implementation is the one shipped; tests swap in scripted fakes where a
//! scenario needs exact sequencing.

pub mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    BackendSettingsStore, ConsentStore, HeartbeatStore, MaintenancePolicy, MaintenanceStore,
    MessageStore, StoreFuture, WorkQueue,
};
