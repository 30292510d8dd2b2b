//! Session state for the HTTP service.
//!
//! Each browser gets its own session id, so two users uploading at the same
//! time no longer overwrite each other's document. A session records the
//! staged source document, the chosen language, its private work directory
//! and whether a run is in flight.
//!
//! Callers that send no session id fall back to the most recent upload,
//! which preserves the single-slot behaviour of a plain
//! upload → process → download sequence.

use crate::config::Language;
use crate::error::PipelineError;
use crate::process::CancelFlag;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// What a session knows about its upload.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: Uuid,
    /// The staged source PDF.
    pub document: PathBuf,
    pub language: Language,
    /// Directory for this session's interim and combined PDFs.
    pub work_dir: PathBuf,
}

#[derive(Debug)]
struct SessionEntry {
    info: SessionInfo,
    last_seen: Instant,
    /// Set while a run is in flight.
    running: Option<CancelFlag>,
}

/// Session storage shared by all handlers.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    /// Session of the most recent upload.
    latest: RwLock<Option<Uuid>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                latest: RwLock::new(None),
                ttl,
            }),
        }
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Record an upload for `info.id`, replacing whatever that session held,
    /// and make it the latest upload.
    ///
    /// Fails with [`PipelineError::Busy`] while the session is processing.
    pub async fn record_upload(&self, info: SessionInfo) -> Result<(), PipelineError> {
        let id = info.id;
        {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.get(&id).is_some_and(|s| s.running.is_some()) {
                return Err(PipelineError::Busy {
                    session: id.to_string(),
                });
            }
            sessions.insert(
                id,
                SessionEntry {
                    info,
                    last_seen: Instant::now(),
                    running: None,
                },
            );
        }
        *self.inner.latest.write().await = Some(id);

        tracing::info!(session = %id, "Upload recorded");
        Ok(())
    }

    /// `id` when given, else the latest upload's session.
    pub async fn resolve(&self, id: Option<Uuid>) -> Option<Uuid> {
        match id {
            Some(id) => Some(id),
            None => *self.inner.latest.read().await,
        }
    }

    /// Snapshot of a session, refreshing its expiry.
    pub async fn get(&self, id: Uuid) -> Option<SessionInfo> {
        let mut sessions = self.inner.sessions.write().await;
        sessions.get_mut(&id).map(|s| {
            s.last_seen = Instant::now();
            s.info.clone()
        })
    }

    // ========================================================================
    // Processing lifecycle
    // ========================================================================

    /// Mark `id` as processing and hand out its cancel flag.
    ///
    /// Fails with [`PipelineError::NotFound`] for an unknown session and
    /// with [`PipelineError::Busy`] if a run is already in flight.
    pub async fn begin_processing(
        &self,
        id: Uuid,
    ) -> Result<(SessionInfo, CancelFlag), PipelineError> {
        let mut sessions = self.inner.sessions.write().await;
        let entry = sessions
            .get_mut(&id)
            .ok_or_else(|| PipelineError::NotFound("File not found.".into()))?;

        if entry.running.is_some() {
            return Err(PipelineError::Busy {
                session: id.to_string(),
            });
        }

        let cancel = CancelFlag::new();
        entry.running = Some(cancel.clone());
        entry.last_seen = Instant::now();
        Ok((entry.info.clone(), cancel))
    }

    /// Clear the in-flight mark of `id`.
    pub async fn finish_processing(&self, id: Uuid) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(entry) = sessions.get_mut(&id) {
            entry.running = None;
            entry.last_seen = Instant::now();
        }
    }

    /// Raise the cancel flag of `id`'s run. Returns false when nothing runs.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let sessions = self.inner.sessions.read().await;
        match sessions.get(&id).and_then(|s| s.running.as_ref()) {
            Some(flag) => {
                flag.cancel();
                tracing::info!(session = %id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    pub async fn is_processing(&self, id: Uuid) -> bool {
        let sessions = self.inner.sessions.read().await;
        sessions.get(&id).is_some_and(|s| s.running.is_some())
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Drop idle sessions older than the TTL and return them so the caller
    /// can delete their files. Sessions with a run in flight are kept.
    pub async fn purge_expired(&self) -> Vec<SessionInfo> {
        self.purge_idle_since(Instant::now()).await
    }

    async fn purge_idle_since(&self, now: Instant) -> Vec<SessionInfo> {
        let ttl = self.inner.ttl;
        let expired: Vec<SessionInfo> = {
            let mut sessions = self.inner.sessions.write().await;
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, s)| s.running.is_none() && now.duration_since(s.last_seen) >= ttl)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| sessions.remove(id))
                .map(|s| s.info)
                .collect()
        };

        if !expired.is_empty() {
            let mut latest = self.inner.latest.write().await;
            if latest.is_some_and(|l| expired.iter().any(|s| s.id == l)) {
                *latest = None;
            }
            tracing::info!(count = expired.len(), "Expired sessions purged");
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: Uuid, doc: &str) -> SessionInfo {
        SessionInfo {
            id,
            document: PathBuf::from(doc),
            language: Language::English,
            work_dir: PathBuf::from("output").join(id.to_string()),
        }
    }

    #[tokio::test]
    async fn latest_upload_is_the_fallback() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.record_upload(info(a, "a.pdf")).await.unwrap();
        store.record_upload(info(b, "b.pdf")).await.unwrap();

        assert_eq!(store.resolve(None).await, Some(b));
        assert_eq!(store.resolve(Some(a)).await, Some(a));
        assert_eq!(store.get(a).await.unwrap().document, PathBuf::from("a.pdf"));
    }

    #[tokio::test]
    async fn second_upload_to_same_session_overwrites() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        store.record_upload(info(id, "first.pdf")).await.unwrap();
        store.record_upload(info(id, "second.pdf")).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().document, PathBuf::from("second.pdf"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_processing_is_rejected() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        store.record_upload(info(id, "a.pdf")).await.unwrap();

        let (_, flag) = store.begin_processing(id).await.unwrap();
        let busy = |r: Result<_, PipelineError>| matches!(r, Err(PipelineError::Busy { .. }));
        assert!(busy(store.begin_processing(id).await.map(|_| ())));
        assert!(busy(store.record_upload(info(id, "b.pdf")).await.map(|_| ())));

        assert!(store.cancel(id).await);
        assert!(flag.is_cancelled());

        store.finish_processing(id).await;
        assert!(!store.is_processing(id).await);
        assert!(store.begin_processing(id).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let store = SessionStore::new(Duration::from_secs(60));
        let err = store.begin_processing(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert!(!store.cancel(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn purge_skips_running_sessions() {
        let store = SessionStore::new(Duration::from_secs(0));
        let (idle, busy) = (Uuid::new_v4(), Uuid::new_v4());
        store.record_upload(info(idle, "a.pdf")).await.unwrap();
        store.record_upload(info(busy, "b.pdf")).await.unwrap();
        store.begin_processing(busy).await.unwrap();

        let purged = store.purge_idle_since(Instant::now() + Duration::from_secs(1)).await;
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].id, idle);
        assert!(store.get(busy).await.is_some());
        assert_eq!(store.resolve(None).await, Some(busy));
    }
}
