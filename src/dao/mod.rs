//! Data access layer: entity models, storage errors, and the swappable
//! session backends.

/// Database model definitions.
pub mod models;
/// Backend implementations and the strategy trait.
pub mod session_store;
/// Storage abstraction layer for backend errors.
pub mod storage;
