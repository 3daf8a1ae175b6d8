use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use uuid::Uuid;

use super::{Session, SessionPhase, TaskHandle};
use crate::error::{RecruitError, RecruitResult};
use crate::platform::UserId;

/// Background tasks a session can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Provisioning,
    Watcher,
}

struct SessionEntry {
    session: Session,
    provisioning: Option<TaskHandle>,
    watcher: Option<TaskHandle>,
}

impl SessionEntry {
    fn slot(&mut self, kind: TaskKind) -> &mut Option<TaskHandle> {
        match kind {
            TaskKind::Provisioning => &mut self.provisioning,
            TaskKind::Watcher => &mut self.watcher,
        }
    }
}

/// Everything that was attached to a session when it left the store.
pub struct RemovedSession {
    pub session: Session,
    pub provisioning: Option<TaskHandle>,
    pub watcher: Option<TaskHandle>,
}

/// Live sessions keyed by initiator.
///
/// Handlers never keep a `Session` across an await: they re-read it here, and
/// mutate it through [`SessionStore::update`], which applies a change
/// atomically or not at all. A session missing from the store is finished.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<UserId, SessionEntry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new session, or fail if the initiator already has one.
    pub async fn try_create(&self, initiator: UserId) -> RecruitResult<Session> {
        let mut map = self.inner.lock().await;
        if map.contains_key(&initiator) {
            return Err(RecruitError::AlreadyActive(initiator));
        }
        let session = Session::new(initiator);
        map.insert(
            initiator,
            SessionEntry {
                session: session.clone(),
                provisioning: None,
                watcher: None,
            },
        );
        debug!(initiator = %initiator, session = %session.id, "session created");
        Ok(session)
    }

    pub async fn get(&self, initiator: UserId) -> RecruitResult<Session> {
        self.inner
            .lock()
            .await
            .get(&initiator)
            .map(|entry| entry.session.clone())
            .ok_or(RecruitError::SessionExpired)
    }

    /// Like [`SessionStore::get`], but only while `initiator` still owns the
    /// session with this id.
    pub async fn get_by_id(&self, initiator: UserId, id: Uuid) -> RecruitResult<Session> {
        let session = self.get(initiator).await?;
        if session.id != id {
            return Err(RecruitError::SessionExpired);
        }
        Ok(session)
    }

    pub async fn contains(&self, initiator: UserId) -> bool {
        self.inner.lock().await.contains_key(&initiator)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply `change` to the live session.
    ///
    /// The closure works on a copy that replaces the stored session only if it
    /// returns `Ok`, so a rejected change leaves no trace.
    pub async fn update<T, F>(&self, initiator: UserId, change: F) -> RecruitResult<T>
    where
        F: FnOnce(&mut Session) -> RecruitResult<T>,
    {
        let mut map = self.inner.lock().await;
        let entry = map
            .get_mut(&initiator)
            .ok_or(RecruitError::SessionExpired)?;
        let mut draft = entry.session.clone();
        let value = change(&mut draft)?;
        entry.session = draft;
        Ok(value)
    }

    pub async fn remove(&self, initiator: UserId) -> Option<RemovedSession> {
        let removed = self.inner.lock().await.remove(&initiator)?;
        debug!(initiator = %initiator, session = %removed.session.id, "session removed");
        Some(RemovedSession {
            session: removed.session,
            provisioning: removed.provisioning,
            watcher: removed.watcher,
        })
    }

    /// Remove the session only if it is still the one with this id; a newer
    /// session of the same initiator is left alone.
    pub async fn remove_by_id(&self, initiator: UserId, id: Uuid) -> Option<RemovedSession> {
        let mut map = self.inner.lock().await;
        if map.get(&initiator)?.session.id != id {
            return None;
        }
        let removed = map.remove(&initiator)?;
        debug!(initiator = %initiator, session = %id, "session removed");
        Some(RemovedSession {
            session: removed.session,
            provisioning: removed.provisioning,
            watcher: removed.watcher,
        })
    }

    /// Copies of all live sessions, oldest first.
    pub async fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .inner
            .lock()
            .await
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub async fn initiators(&self) -> Vec<UserId> {
        self.snapshot().await.into_iter().map(|s| s.initiator).collect()
    }

    /// Spawn a task owned by the session with id `session`. Spawning and
    /// attaching happen under one lock, so the handle can never be missed by a
    /// concurrent teardown. A session that is closing, or was replaced by a
    /// newer one, gets no task.
    pub async fn spawn_task<F, Fut>(
        &self,
        initiator: UserId,
        session: Uuid,
        kind: TaskKind,
        name: &'static str,
        task: F,
    ) -> RecruitResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut map = self.inner.lock().await;
        let entry = map
            .get_mut(&initiator)
            .filter(|entry| entry.session.id == session)
            .filter(|entry| entry.session.phase != SessionPhase::Closing)
            .ok_or(RecruitError::SessionExpired)?;
        let handle = TaskHandle::spawn(name, task);
        if let Some(previous) = entry.slot(kind).replace(handle) {
            warn!(
                initiator = %initiator,
                "replacing existing {} task; the old one is detached",
                previous.name()
            );
        }
        Ok(())
    }

    /// Detach a task handle from the session, if any.
    pub async fn take_task(&self, initiator: UserId, kind: TaskKind) -> Option<TaskHandle> {
        self.inner
            .lock()
            .await
            .get_mut(&initiator)
            .and_then(|entry| entry.slot(kind).take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionPhase;

    #[tokio::test]
    async fn test_try_create_twice_is_already_active() {
        let store = SessionStore::new();
        store.try_create(UserId(1)).await.unwrap();
        let err = store.try_create(UserId(1)).await.unwrap_err();
        assert!(matches!(err, RecruitError::AlreadyActive(UserId(1))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_create_again_after_remove() {
        let store = SessionStore::new();
        store.try_create(UserId(1)).await.unwrap();
        assert!(store.remove(UserId(1)).await.is_some());
        assert!(store.remove(UserId(1)).await.is_none());
        store.try_create(UserId(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_is_session_expired() {
        let store = SessionStore::new();
        assert!(matches!(
            store.get(UserId(3)).await,
            Err(RecruitError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn test_failed_update_leaves_session_untouched() {
        let store = SessionStore::new();
        store.try_create(UserId(1)).await.unwrap();

        let result: RecruitResult<()> = store
            .update(UserId(1), |s| {
                s.phase = SessionPhase::Active;
                Err(RecruitError::validation("nope"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(
            store.get(UserId(1)).await.unwrap().phase,
            SessionPhase::AwaitingMode
        );

        store
            .update(UserId(1), |s| {
                s.phase = SessionPhase::AwaitingPartySize;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(
            store.get(UserId(1)).await.unwrap().phase,
            SessionPhase::AwaitingPartySize
        );
    }

    #[tokio::test]
    async fn test_spawn_task_requires_live_session() {
        let store = SessionStore::new();
        let result = store
            .spawn_task(
                UserId(1),
                Uuid::new_v4(),
                TaskKind::Watcher,
                "watcher",
                |_t| async {},
            )
            .await;
        assert!(matches!(result, Err(RecruitError::SessionExpired)));
    }

    #[tokio::test]
    async fn test_spawn_task_refuses_closing_or_replaced_session() {
        let store = SessionStore::new();
        let old = store.try_create(UserId(1)).await.unwrap();
        store
            .update(UserId(1), |s| {
                s.phase = SessionPhase::Closing;
                Ok(())
            })
            .await
            .unwrap();
        let result = store
            .spawn_task(
                UserId(1),
                old.id,
                TaskKind::Provisioning,
                "provisioning",
                |_t| async {},
            )
            .await;
        assert!(matches!(result, Err(RecruitError::SessionExpired)));
        assert!(store
            .take_task(UserId(1), TaskKind::Provisioning)
            .await
            .is_none());

        store.remove(UserId(1)).await.unwrap();
        store.try_create(UserId(1)).await.unwrap();
        let result = store
            .spawn_task(
                UserId(1),
                old.id,
                TaskKind::Provisioning,
                "provisioning",
                |_t| async {},
            )
            .await;
        assert!(matches!(result, Err(RecruitError::SessionExpired)));
    }

    #[tokio::test]
    async fn test_remove_by_id_spares_newer_session() {
        let store = SessionStore::new();
        let old = store.try_create(UserId(1)).await.unwrap();
        store.remove(UserId(1)).await.unwrap();
        let fresh = store.try_create(UserId(1)).await.unwrap();

        assert!(store.remove_by_id(UserId(1), old.id).await.is_none());
        assert!(store.get_by_id(UserId(1), old.id).await.is_err());
        assert!(store.contains(UserId(1)).await);
        assert!(store.remove_by_id(UserId(1), fresh.id).await.is_some());
    }

    #[tokio::test]
    async fn test_take_task_detaches_handle() {
        let store = SessionStore::new();
        let session = store.try_create(UserId(1)).await.unwrap();
        store
            .spawn_task(UserId(1), session.id, TaskKind::Watcher, "watcher", |token| async move {
                token.cancelled().await;
            })
            .await
            .unwrap();

        let handle = store.take_task(UserId(1), TaskKind::Watcher).await.unwrap();
        assert!(store.take_task(UserId(1), TaskKind::Watcher).await.is_none());
        handle.cancel_and_wait().await;
    }

    #[tokio::test]
    async fn test_snapshot_is_oldest_first() {
        let store = SessionStore::new();
        store.try_create(UserId(5)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.try_create(UserId(4)).await.unwrap();
        assert_eq!(store.initiators().await, vec![UserId(5), UserId(4)]);
    }
}
