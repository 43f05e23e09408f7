//! Process-wide session registry with per-session locking.
//!
//! The store is an explicitly constructed, injectable object — there is no
//! implicit global. The outer map is guarded by an async RwLock; each
//! session carries its own async mutex so evaluations of one session are
//! mutually exclusive while unrelated sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use super::{SessionId, SessionState};
use crate::config::EvalConfig;
use crate::error::{Error, Result};

/// A registered session: state behind its exclusive execution lock.
pub struct SessionHandle {
    state: Mutex<SessionState>,
}

impl SessionHandle {
    /// Wrap a state in its execution lock. Handles normally come from the
    /// store; constructing one directly is useful for embedding and tests.
    pub fn new(state: SessionState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Take the exclusive per-session lock. Held for a whole evaluation
    /// run, so a concurrent run on the same session cannot start until
    /// the previous one has fully completed.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// A consistent clone of the state: fully pre-step or fully post-step,
    /// never a partially applied one.
    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and register a new session.
    pub async fn create(&self, cfg: EvalConfig) -> Result<SessionId> {
        cfg.validate()?;
        let state = SessionState::new(cfg);
        let id = state.id.clone();

        tracing::debug!(session = %id, repo = %state.cfg.repo_path.display(), "session created");
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(SessionHandle::new(state)));
        Ok(id)
    }

    pub async fn get(&self, id: &SessionId) -> Result<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Remove a session; returns whether it existed. An in-flight run on a
    /// cloned handle finishes against the detached state.
    pub async fn delete(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::debug!(session = %id, "session deleted");
        }
        removed
    }

    pub async fn list(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HaltConfig;

    fn cfg() -> EvalConfig {
        EvalConfig::new("/tmp/repo")
    }

    #[tokio::test]
    async fn create_get_delete_lifecycle() {
        let store = SessionStore::new();
        assert!(store.is_empty().await);

        let id = store.create(cfg()).await.unwrap();
        assert_eq!(store.len().await, 1);

        let handle = store.get(&id).await.unwrap();
        assert_eq!(handle.snapshot().await.step, 0);

        assert!(store.delete(&id).await);
        assert!(!store.delete(&id).await);
        assert!(matches!(
            store.get(&id).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_invalid_config() {
        let store = SessionStore::new();
        let mut bad = cfg();
        bad.halt = HaltConfig {
            max_steps: 0,
            ..Default::default()
        };

        assert!(matches!(store.create(bad).await, Err(Error::Config(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = SessionStore::new();
        let a = store.create(cfg()).await.unwrap();
        let b = store.create(cfg()).await.unwrap();
        assert_ne!(a, b);

        let handle_a = store.get(&a).await.unwrap();
        let mut state_a = handle_a.lock().await;
        state_a.step = 7;

        // Holding a's lock does not block b.
        let handle_b = store.get(&b).await.unwrap();
        assert_eq!(handle_b.snapshot().await.step, 0);
    }

    #[tokio::test]
    async fn list_returns_all_ids() {
        let store = SessionStore::new();
        let a = store.create(cfg()).await.unwrap();
        let b = store.create(cfg()).await.unwrap();

        let mut ids = store.list().await;
        ids.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        let mut expected = vec![a, b];
        expected.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        assert_eq!(ids, expected);
    }
}
