//! Session registry keyed by phone number.
//!
//! Client, execution context and login state live together in one
//! [`AccountSession`], so a single map replaces three parallel ones and an
//! entry can never be half present.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::session::AccountSession;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<AccountSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session.
    pub fn get(&self, phone: &str) -> Option<Arc<AccountSession>> {
        self.lock().get(phone).cloned()
    }

    pub fn contains(&self, phone: &str) -> bool {
        self.lock().contains_key(phone)
    }

    /// Register `session` unless its phone is already taken.
    ///
    /// The session is built before the lock is taken, so the lock never waits
    /// on thread startup. When the phone is taken the session is handed back
    /// as `Err` for the caller to tear down.
    pub fn insert_if_absent(
        &self,
        session: AccountSession,
    ) -> Result<Arc<AccountSession>, Arc<AccountSession>> {
        let session = Arc::new(session);
        let mut sessions = self.lock();
        if sessions.contains_key(session.phone()) {
            return Err(session);
        }

        sessions.insert(session.phone().to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Remove and return the session for `phone`, if present.
    pub fn remove(&self, phone: &str) -> Option<Arc<AccountSession>> {
        self.lock().remove(phone)
    }

    /// Remove `session` only if it is still the registered entry for its phone.
    pub fn remove_if_same(&self, session: &Arc<AccountSession>) -> bool {
        let mut sessions = self.lock();
        match sessions.get(session.phone()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.phone());
                true
            }
            _ => false,
        }
    }

    /// Remove every session and hand them back for teardown.
    pub fn drain(&self) -> Vec<Arc<AccountSession>> {
        self.lock().drain().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AccountSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
