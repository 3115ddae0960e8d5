//! Profile Stores
//!
//! `MemoryStore` keeps everything in process; `JsonFileStore` wraps it and
//! rewrites a JSON file after every change. A missing or unreadable file
//! starts an empty store rather than failing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::warn;
use uuid::Uuid;

use super::{
    normalize_limit, profile_key, PersistenceError, ProfileStore, ProfileSummary, RoundRecord,
};

const STORE_FILE_VERSION: u8 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredProfile {
    id: String,
    display_name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredSession {
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-process store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    /// Profile key -> profile
    profiles: BTreeMap<String, StoredProfile>,
    sessions: BTreeMap<String, StoredSession>,
    rounds: Vec<RoundRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of round records.
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// True if the session exists and has been ended.
    pub fn is_session_ended(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|s| s.ended_at.is_some())
    }

    fn profile_by_id(&self, profile_id: &str) -> Option<&StoredProfile> {
        self.profiles.values().find(|p| p.id == profile_id)
    }
}

impl ProfileStore for MemoryStore {
    fn upsert_profile(&mut self, display_name: &str) -> Result<String, PersistenceError> {
        let key = profile_key(display_name);
        if key.is_empty() {
            return Err(PersistenceError::InvalidName);
        }
        let now = Utc::now();
        let name = display_name.split_whitespace().collect::<Vec<_>>().join(" ");

        let profile = self.profiles.entry(key).or_insert_with(|| StoredProfile {
            id: Uuid::new_v4().to_string(),
            display_name: name.clone(),
            created_at: now,
            updated_at: now,
        });
        profile.display_name = name;
        profile.updated_at = now;
        Ok(profile.id.clone())
    }

    fn create_session(&mut self) -> Result<String, PersistenceError> {
        let id = Uuid::new_v4().to_string();
        self.sessions.insert(
            id.clone(),
            StoredSession {
                started_at: Utc::now(),
                ended_at: None,
            },
        );
        Ok(id)
    }

    fn end_session(&mut self, session_id: &str) -> Result<(), PersistenceError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PersistenceError::UnknownSession(session_id.to_string()))?;
        session.ended_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    fn record_round(&mut self, record: RoundRecord) -> Result<(), PersistenceError> {
        if self.profile_by_id(&record.profile_id).is_none() {
            return Err(PersistenceError::UnknownProfile(record.profile_id));
        }
        if let Some(session_id) = &record.session_id {
            if !self.sessions.contains_key(session_id) {
                return Err(PersistenceError::UnknownSession(session_id.clone()));
            }
        }
        self.rounds.push(record);
        Ok(())
    }

    fn top_profiles(&self, limit: usize) -> Result<Vec<ProfileSummary>, PersistenceError> {
        let mut summaries: BTreeMap<&str, ProfileSummary> = self
            .profiles
            .values()
            .map(|p| {
                (
                    p.id.as_str(),
                    ProfileSummary {
                        profile_id: p.id.clone(),
                        display_name: p.display_name.clone(),
                        rounds_played: 0,
                        total_survival_ms: 0,
                        best_survival_ms: 0,
                        rounds_as_it: 0,
                    },
                )
            })
            .collect();

        for record in &self.rounds {
            if let Some(summary) = summaries.get_mut(record.profile_id.as_str()) {
                summary.rounds_played += 1;
                summary.total_survival_ms += record.survival_ms;
                summary.best_survival_ms = summary.best_survival_ms.max(record.survival_ms);
                if record.was_it {
                    summary.rounds_as_it += 1;
                }
            }
        }

        let mut ranked: Vec<ProfileSummary> = summaries.into_values().collect();
        ranked.sort_by(|a, b| {
            b.total_survival_ms
                .cmp(&a.total_survival_ms)
                .then_with(|| b.best_survival_ms.cmp(&a.best_survival_ms))
                .then_with(|| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()))
        });
        ranked.truncate(normalize_limit(limit));
        Ok(ranked)
    }
}

// =============================================================================
// JSON FILE STORE
// =============================================================================

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u8,
    #[serde(flatten)]
    data: MemoryStore,
}

/// Store persisted to a JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    file_path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open (or start) a store at `file_path`.
    pub fn open(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let inner = load(&file_path);
        Self { file_path, inner }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn save(&self) -> Result<(), PersistenceError> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let payload = StoreFile {
            version: STORE_FILE_VERSION,
            data: self.inner.clone(),
        };
        let text = serde_json::to_string_pretty(&payload)?;
        let tmp = self.file_path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.file_path)?;
        Ok(())
    }
}

fn load(path: &Path) -> MemoryStore {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), %error, "Failed to read profile store");
            }
            return MemoryStore::new();
        }
    };
    match serde_json::from_str::<StoreFile>(&text) {
        Ok(file) if file.version == STORE_FILE_VERSION => file.data,
        Ok(file) => {
            warn!(path = %path.display(), version = file.version, "Unsupported profile store version");
            MemoryStore::new()
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "Failed to parse profile store");
            MemoryStore::new()
        }
    }
}

impl ProfileStore for JsonFileStore {
    fn upsert_profile(&mut self, display_name: &str) -> Result<String, PersistenceError> {
        let id = self.inner.upsert_profile(display_name)?;
        self.save()?;
        Ok(id)
    }

    fn create_session(&mut self) -> Result<String, PersistenceError> {
        let id = self.inner.create_session()?;
        self.save()?;
        Ok(id)
    }

    fn end_session(&mut self, session_id: &str) -> Result<(), PersistenceError> {
        self.inner.end_session(session_id)?;
        self.save()
    }

    fn record_round(&mut self, record: RoundRecord) -> Result<(), PersistenceError> {
        self.inner.record_round(record)?;
        self.save()
    }

    fn top_profiles(&self, limit: usize) -> Result<Vec<ProfileSummary>, PersistenceError> {
        self.inner.top_profiles(limit)
    }
}

// =============================================================================
// TESTS
// =============================================================================
