//! User sessions.

use parking_lot::Mutex;
use uuid::Uuid;

use crate::lov::LovCache;
use crate::types::TransactionId;

/// A user's session: identity, open transactions and cached lists.
#[derive(Debug)]
pub struct Session {
    user_id: String,
    session_id: Uuid,
    active: Mutex<Vec<TransactionId>>,
    lovs: LovCache,
}

impl Session {
    /// Creates a session for a user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Uuid::new_v4(),
            active: Mutex::new(Vec::new()),
            lovs: LovCache::new(),
        }
    }

    /// Returns the user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the session id.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns the transactions currently open in this session.
    #[must_use]
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.active.lock().clone()
    }

    /// Returns the session's list cache.
    #[must_use]
    pub fn lov_cache(&self) -> &LovCache {
        &self.lovs
    }

    pub(crate) fn add_active_transaction(&self, id: TransactionId) {
        self.active.lock().push(id);
    }

    pub(crate) fn remove_active_transaction(&self, id: TransactionId) {
        self.active.lock().retain(|t| *t != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_active_transactions() {
        let session = Session::new("alice");
        session.add_active_transaction(TransactionId::new(1));
        session.add_active_transaction(TransactionId::new(2));
        session.remove_active_transaction(TransactionId::new(1));
        assert_eq!(session.active_transactions(), vec![TransactionId::new(2)]);
        assert_eq!(session.user_id(), "alice");
    }

    #[test]
    fn session_ids_differ() {
        assert_ne!(Session::new("a").session_id(), Session::new("a").session_id());
    }
}
