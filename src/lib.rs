// Re-export the engine modules for the binary and for integration tests
pub mod models;
pub mod sync;

// Re-export main types for convenience
pub use models::*;
pub use sync::{EngineEvent, SyncEngine, ViewEvent};
