//! In-process fallback backend.
//!
//! Keeps every session tree in local memory so the store stays available
//! when no Redis candidate is reachable. Cross-process visibility and
//! pub/sub fan-out are sacrificed in this mode.

mod store;

pub use store::MemorySessionStore;
