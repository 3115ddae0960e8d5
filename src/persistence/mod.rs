//! Persistence Module
//!
//! Player profiles, play sessions and per-round survival records.
//!
//! The simulation never waits on this layer: round records and session
//! ends are fire-and-forget through [`PersistenceHandle`], and a failure
//! only costs a participant their profile link.

pub mod store;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

pub use store::{MemoryStore, JsonFileStore};
pub use worker::PersistenceHandle;

/// Largest leaderboard page.
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Backing file could not be read or written.
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file is not valid JSON for the store.
    #[error("Storage format error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Display name is empty after normalization.
    #[error("Invalid display name")]
    InvalidName,

    /// No profile with this id.
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    /// No session with this id.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Worker has shut down.
    #[error("Persistence unavailable")]
    Unavailable,
}

/// One participant's result for one round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub profile_id: String,
    pub session_id: Option<String>,
    pub round_number: u32,
    pub was_it: bool,
    pub survival_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Leaderboard row, ranked by cumulative survival.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub profile_id: String,
    pub display_name: String,
    pub rounds_played: u64,
    pub total_survival_ms: u64,
    pub best_survival_ms: u64,
    pub rounds_as_it: u64,
}

/// Storage backend for profiles, sessions and round records.
pub trait ProfileStore: Send {
    /// Find or create the profile for a display name; returns its id.
    fn upsert_profile(&mut self, display_name: &str) -> Result<String, PersistenceError>;

    /// Open a play session; returns its id.
    fn create_session(&mut self) -> Result<String, PersistenceError>;

    /// Close a play session.
    fn end_session(&mut self, session_id: &str) -> Result<(), PersistenceError>;

    /// Append a round result.
    fn record_round(&mut self, record: RoundRecord) -> Result<(), PersistenceError>;

    /// Profiles ranked by cumulative survival time, best first.
    fn top_profiles(&self, limit: usize) -> Result<Vec<ProfileSummary>, PersistenceError>;
}

/// Normalize a display name into a profile lookup key.
///
/// Case-insensitive, with surrounding and repeated whitespace ignored.
pub fn profile_key(display_name: &str) -> String {
    display_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Clamp a requested leaderboard size.
pub fn normalize_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LEADERBOARD_LIMIT)
}
