//! Service layer: the store facade and the backend supervisor.

/// Append-only answer log operations.
pub mod answers;
/// Broadcast bus operations and the subscription handle.
pub mod events;
/// Leaderboard operations and the derived joined view.
pub mod leaderboard;
/// Participant directory operations.
pub mod participants;
/// Health and stats introspection.
pub mod stats;
/// The store facade and its lifecycle.
pub mod store;
/// Backend connection sequencing and health supervision.
pub(crate) mod supervisor;
