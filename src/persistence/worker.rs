//! Persistence Worker
//!
//! Runs a [`ProfileStore`] on a blocking thread and exposes it to async
//! code. Queries wait on a oneshot reply; writes that nobody needs to
//! await (round records, session ends) are queued and their failures
//! logged by the worker.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{PersistenceError, ProfileStore, ProfileSummary, RoundRecord};

type Reply<T> = oneshot::Sender<Result<T, PersistenceError>>;

enum Request {
    UpsertProfile { display_name: String, reply: Reply<String> },
    CreateSession { reply: Reply<String> },
    EndSession { session_id: String },
    RecordRound { record: RoundRecord },
    TopProfiles { limit: usize, reply: Reply<Vec<ProfileSummary>> },
}

/// Cloneable handle to the persistence worker.
#[derive(Clone, Debug)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl PersistenceHandle {
    /// Start a worker that owns `store`.
    ///
    /// The worker exits once every handle has been dropped.
    pub fn spawn<S: ProfileStore + 'static>(store: S) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::task::spawn_blocking(move || run_worker(store, rx));
        (Self { tx }, task)
    }

    /// Find or create the profile for a display name.
    pub async fn upsert_profile(&self, display_name: impl Into<String>) -> Result<String, PersistenceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::UpsertProfile { display_name: display_name.into(), reply })?;
        rx.await.map_err(|_| PersistenceError::Unavailable)?
    }

    /// Open a play session.
    pub async fn create_session(&self) -> Result<String, PersistenceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::CreateSession { reply })?;
        rx.await.map_err(|_| PersistenceError::Unavailable)?
    }

    /// Close a play session (fire-and-forget).
    pub fn end_session(&self, session_id: impl Into<String>) {
        self.send_or_log(Request::EndSession { session_id: session_id.into() });
    }

    /// Append a round result (fire-and-forget).
    pub fn record_round(&self, record: RoundRecord) {
        self.send_or_log(Request::RecordRound { record });
    }

    /// Leaderboard, best first.
    pub async fn top_profiles(&self, limit: usize) -> Result<Vec<ProfileSummary>, PersistenceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::TopProfiles { limit, reply })?;
        rx.await.map_err(|_| PersistenceError::Unavailable)?
    }

    fn send(&self, request: Request) -> Result<(), PersistenceError> {
        self.tx.send(request).map_err(|_| PersistenceError::Unavailable)
    }

    fn send_or_log(&self, request: Request) {
        if self.tx.send(request).is_err() {
            warn!("Persistence worker gone, dropping write");
        }
    }
}

fn run_worker<S: ProfileStore>(mut store: S, mut rx: mpsc::UnboundedReceiver<Request>) {
    debug!("Persistence worker started");
    while let Some(request) = rx.blocking_recv() {
        match request {
            Request::UpsertProfile { display_name, reply } => {
                let _ = reply.send(store.upsert_profile(&display_name));
            }
            Request::CreateSession { reply } => {
                let _ = reply.send(store.create_session());
            }
            Request::EndSession { session_id } => {
                if let Err(error) = store.end_session(&session_id) {
                    warn!(%session_id, %error, "Failed to end session");
                }
            }
            Request::RecordRound { record } => {
                let round = record.round_number;
                if let Err(error) = store.record_round(record) {
                    warn!(round, %error, "Failed to record round");
                }
            }
            Request::TopProfiles { limit, reply } => {
                let _ = reply.send(store.top_profiles(limit));
            }
        }
    }
    debug!("Persistence worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_worker_round_trip() {
        let (handle, task) = PersistenceHandle::spawn(MemoryStore::new());

        let session = handle.create_session().await.unwrap();
        let profile = handle.upsert_profile("Erin").await.unwrap();
        handle.record_round(RoundRecord {
            profile_id: profile.clone(),
            session_id: Some(session.clone()),
            round_number: 1,
            was_it: false,
            survival_ms: 9_000,
            recorded_at: Utc::now(),
        });
        handle.end_session(session);

        // Requests are processed in order, so the query sees the record
        let top = handle.top_profiles(10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].profile_id, profile);
        assert_eq!(top[0].total_survival_ms, 9_000);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_worker() {
        let (handle, _task) = PersistenceHandle::spawn(MemoryStore::new());
        handle.record_round(RoundRecord {
            profile_id: "unknown".to_string(),
            session_id: None,
            round_number: 1,
            was_it: true,
            survival_ms: 0,
            recorded_at: Utc::now(),
        });
        handle.end_session("unknown");

        assert!(handle.upsert_profile("Frank").await.is_ok());
        assert!(matches!(
            handle.upsert_profile("").await,
            Err(PersistenceError::InvalidName)
        ));
    }
}
