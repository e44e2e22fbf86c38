//! Redis-backed distributed backend.
//!
//! Sessions and participants are JSON values, the leaderboard is a native
//! sorted set, the answer log is a list, and session events fan out over
//! Redis pub/sub so every worker process serving the same session stays in
//! sync.

mod config;
mod connection;
mod error;
mod store;

pub use config::RedisConfig;
pub use error::{RedisDaoError, RedisResult};
pub use store::RedisSessionStore;
