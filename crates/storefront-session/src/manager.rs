//! Per-request session loading and persistence.

use cookie::Cookie;

use crate::cookies::SessionCookies;
use crate::error::SessionError;
use crate::payload::Session;
use crate::store::DynSessionStore;

/// Binds the session store to the signed session cookie.
#[derive(Clone)]
pub struct SessionManager {
    store: DynSessionStore,
    cookies: SessionCookies,
}

impl SessionManager {
    pub fn new(store: DynSessionStore, cookies: SessionCookies) -> Self {
        Self { store, cookies }
    }

    pub fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    /// Loads the session referenced by the request's `Cookie` header.
    ///
    /// A missing, forged or expired session yields a fresh unsaved session.
    pub async fn load(&self, cookie_header: Option<&str>) -> Result<Session, SessionError> {
        let Some(id) = cookie_header.and_then(|header| self.cookies.session_id_from_header(header))
        else {
            return Ok(Session::new());
        };

        match self.store.get(&id).await? {
            Some(payload) => Ok(Session::restored(id, payload)),
            None => {
                tracing::debug!("session cookie references an unknown session");
                Ok(Session::new())
            }
        }
    }

    /// Writes the session to the store.
    ///
    /// Returns the cookie to issue when the session was not stored before.
    pub async fn persist(
        &self,
        session: &mut Session,
    ) -> Result<Option<Cookie<'static>>, SessionError> {
        self.store
            .set(session.id(), session.payload(), self.cookies.max_age())
            .await?;

        let issue = !session.is_persisted();
        session.mark_persisted();
        Ok(issue.then(|| self.cookies.issue(session.id())))
    }

    /// Removes the session from the store and returns the clearing cookie.
    pub async fn destroy(&self, session: &mut Session) -> Result<Cookie<'static>, SessionError> {
        if session.is_persisted() {
            self.store.destroy(session.id()).await?;
        }
        session.mark_destroyed();
        Ok(self.cookies.clear())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cookies::SessionCookieConfig;
    use crate::store::{MemorySessionStore, SessionStore};

    fn manager(store: Arc<MemorySessionStore>) -> SessionManager {
        let cookies = SessionCookies::new(&SessionCookieConfig {
            secret: "secret".into(),
            ..Default::default()
        })
        .unwrap();
        SessionManager::new(store, cookies)
    }

    #[tokio::test]
    async fn test_load_without_cookie_creates_unsaved_session() {
        let manager = manager(Arc::new(MemorySessionStore::new()));

        let session = manager.load(None).await.unwrap();
        assert!(!session.is_persisted());
    }

    #[tokio::test]
    async fn test_persist_issues_cookie_once() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = manager(store.clone());
        let mut session = manager.load(None).await.unwrap();

        let first = manager.persist(&mut session).await.unwrap();
        let second = manager.persist(&mut session).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(store.get(session.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_restores_persisted_session() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = manager(store);
        let mut session = manager.load(None).await.unwrap();
        session.payload_mut().medusa_token = Some("T".into());
        let issued = manager.persist(&mut session).await.unwrap().unwrap();

        let header = format!("{}={}", issued.name(), issued.value());
        let restored = manager.load(Some(&header)).await.unwrap();

        assert!(restored.is_persisted());
        assert_eq!(restored.id(), session.id());
        assert_eq!(restored.payload().medusa_token.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn test_destroy_removes_session() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = manager(store.clone());
        let mut session = manager.load(None).await.unwrap();
        manager.persist(&mut session).await.unwrap();
        let id = session.id().clone();

        let cleared = manager.destroy(&mut session).await.unwrap();

        assert_eq!(cleared.value(), "");
        assert!(!session.is_persisted());
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
