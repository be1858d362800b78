//! Editing sessions
//!
//! Image URLs carry an opaque token instead of anything that names the
//! document. The registry maps tokens back to open documents through weak
//! references, so closing a document in the host is enough to invalidate
//! its URLs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::config::SnapshotConfig;
use crate::error::SessionError;
use crate::normalize::NormalizeContext;
use crate::snapshot::FragmentSnapshotCache;
use crate::traits::DocumentController;

/// Random bytes per token (160 bits)
const TOKEN_BYTES: usize = 20;

/// Opaque per-document session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Fresh token from the OS random source, hex encoded
    pub fn generate() -> Result<Self, SessionError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        getrandom::getrandom(&mut bytes).map_err(|e| SessionError::Random(e.to_string()))?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Token -> document map that never keeps a document alive
pub struct SessionRegistry<D> {
    sessions: RwLock<HashMap<SessionToken, Weak<D>>>,
}

impl<D> Default for SessionRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> SessionRegistry<D> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a new token for `document`
    ///
    /// Every call issues a different token; callers that want one token per
    /// document go through [`ensure_initialized`].
    pub fn register(&self, document: &Arc<D>) -> Result<SessionToken, SessionError> {
        let token = SessionToken::generate()?;

        let mut sessions = self.sessions.write();
        sessions.retain(|_, doc| doc.strong_count() > 0);
        sessions.insert(token.clone(), Arc::downgrade(document));

        tracing::debug!(active = sessions.len(), "Registered editing session");
        Ok(token)
    }

    /// Document behind `token`, unless it is unknown or already closed
    pub fn resolve(&self, token: &SessionToken) -> Option<Arc<D>> {
        let document = self.sessions.read().get(token).and_then(Weak::upgrade);
        if document.is_none() {
            tracing::debug!("Session token unknown or expired");
        }
        document
    }

    /// Forget sessions whose document is gone. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, doc| doc.strong_count() > 0);
        before - sessions.len()
    }

    /// Registered sessions, including expired ones not purged yet
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Per-document editing context
///
/// Owned by the host for as long as the document is open. Holds the frozen
/// equations of the document and remembers the token it was registered
/// under.
pub struct DocumentSession<C: DocumentController> {
    equations: FragmentSnapshotCache<C>,
    token: Mutex<Option<SessionToken>>,
}

impl<C: DocumentController> DocumentSession<C> {
    pub fn new(controller: Arc<C>, config: &SnapshotConfig) -> Self {
        Self {
            equations: FragmentSnapshotCache::new(controller, config),
            token: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &Arc<C> {
        self.equations.controller()
    }

    pub fn equations(&self) -> &FragmentSnapshotCache<C> {
        &self.equations
    }

    /// Token issued for this document, if it has been registered
    pub fn token(&self) -> Option<SessionToken> {
        self.token.lock().clone()
    }

    pub fn normalize_context(&self) -> NormalizeContext {
        let controller = self.controller();
        NormalizeContext::new(controller.system_id(), controller.current_doctype())
    }
}

/// Register `session` once and return its token on every later call
pub fn ensure_initialized<C: DocumentController>(
    registry: &SessionRegistry<DocumentSession<C>>,
    session: &Arc<DocumentSession<C>>,
) -> Result<SessionToken, SessionError> {
    let mut marker = session.token.lock();
    if let Some(token) = marker.as_ref() {
        return Ok(token.clone());
    }

    let token = registry.register(session)?;
    *marker = Some(token.clone());
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SerializationError;

    struct Doc;

    impl DocumentController for Doc {
        type Node = String;

        fn serialize_subtree(&self, node: &String) -> Result<String, SerializationError> {
            Ok(node.clone())
        }

        fn current_doctype(&self) -> Option<String> {
            Some("<!DOCTYPE article>".to_string())
        }

        fn system_id(&self) -> String {
            "file:/article.xml".to_string()
        }
    }

    #[test]
    fn test_token_format() {
        let token = SessionToken::generate().unwrap();
        assert_eq!(token.as_str().len(), 40);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, SessionToken::generate().unwrap());
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = SessionRegistry::new();
        let doc = Arc::new("document");
        let token = registry.register(&doc).unwrap();

        let resolved = registry.resolve(&token).unwrap();
        assert!(Arc::ptr_eq(&resolved, &doc));
        assert!(registry.resolve(&SessionToken::from("unknown")).is_none());
    }

    #[test]
    fn test_weak_session_expiry() {
        let registry = SessionRegistry::new();
        let doc = Arc::new(String::from("document"));
        let token = registry.register(&doc).unwrap();

        drop(doc);
        assert!(registry.resolve(&token).is_none());
        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_purges_expired() {
        let registry = SessionRegistry::new();
        for _ in 0..5 {
            let doc = Arc::new(0u8);
            registry.register(&doc).unwrap();
        }
        let live = Arc::new(1u8);
        registry.register(&live).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = Arc::new(DocumentSession::new(Arc::new(Doc), &SnapshotConfig::default()));

        assert!(session.token().is_none());
        let first = ensure_initialized(&registry, &session).unwrap();
        let second = ensure_initialized(&registry, &session).unwrap();

        assert_eq!(first, second);
        assert_eq!(session.token(), Some(first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_normalize_context_from_controller() {
        let session = DocumentSession::new(Arc::new(Doc), &SnapshotConfig::default());
        let ctx = session.normalize_context();
        assert_eq!(ctx.system_id, "file:/article.xml");
        assert_eq!(ctx.doctype.as_deref(), Some("<!DOCTYPE article>"));
    }
}
