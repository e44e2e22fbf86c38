//! Session, leaderboard, and answer-log store for live many-participant
//! quiz sessions.
//!
//! The store runs against a prioritized list of Redis candidates and
//! hot-swaps to an in-process fallback when none is reachable (or when a
//! live connection drops), so gameplay keeps working while degraded. State
//! is ephemeral: every session tree is bounded by a sliding TTL.
//!
//! ```no_run
//! use live_quiz_store::{LiveSessionStore, NewParticipant, NewSession, StoreConfig};
//!
//! # async fn demo() -> Result<(), live_quiz_store::StoreError> {
//! let store = LiveSessionStore::init(StoreConfig::from_env()).await;
//!
//! let session = store
//!     .create_session(NewSession::new("quiz-7", "host-1"))
//!     .await?;
//! let code = &session.session_code;
//!
//! store
//!     .add_participant(code, NewParticipant::new("U1", "Alice"))
//!     .await?;
//! store.update_leaderboard(code, "U1", 50).await?;
//!
//! let top = store.leaderboard(code, 10).await?;
//! assert_eq!(top[0].score, 50);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dao;
pub mod error;
pub mod services;
pub mod state;

pub use config::{BackendTarget, StoreConfig};
pub use dao::models::{
    AnswerEntity, Opaque, ParticipantEntity, ParticipantPatch, SessionEntity, SessionEvent,
    SessionPatch, SessionStatus,
};
pub use dao::session_store::BackendKind;
pub use error::StoreError;
pub use services::answers::NewAnswer;
pub use services::events::SessionSubscription;
pub use services::leaderboard::LeaderboardEntry;
pub use services::participants::NewParticipant;
pub use services::stats::{BackendStats, SessionStats};
pub use services::store::{LiveSessionStore, NewSession};
