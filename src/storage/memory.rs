// In-memory storage backend

use crate::auth::{hash_password, verify_password};
use crate::storage::{
    paginate, wildcard_match, ConnectionHandle, DirectoryPage, LoginSession, QueuedMessage,
    SessionTable, Store, StoreError,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, String>,
    queues: HashMap<String, Vec<QueuedMessage>>,
    sessions: SessionTable,
}

/// Map-backed store. Suitable for tests and low-load use; everything is
/// lost on restart.
pub struct MemoryStore {
    session_ttl: Duration,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(session_ttl: Duration) -> Self {
        Self {
            session_ttl,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn account_exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.lock().users.contains_key(username))
    }

    fn create_account(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.users.contains_key(username) {
            return Err(StoreError::UsernameTaken);
        }
        state
            .users
            .insert(username.to_string(), hash_password(password));
        state.queues.insert(username.to_string(), Vec::new());
        Ok(())
    }

    fn login(&self, username: &str, password: &str) -> Result<LoginSession, StoreError> {
        let mut state = self.lock();
        let stored = state.users.get(username).ok_or(StoreError::UnknownUser)?;
        if !verify_password(password, stored) {
            return Err(StoreError::WrongPassword);
        }

        let token = state.sessions.create(username, self.session_ttl);
        let unread_count = state.queues.get(username).map(Vec::len).unwrap_or(0);

        Ok(LoginSession {
            token,
            unread_count,
        })
    }

    fn listen(
        &self,
        username: &str,
        password: &str,
        handle: ConnectionHandle,
    ) -> Result<String, StoreError> {
        let mut state = self.lock();
        let stored = state.users.get(username).ok_or(StoreError::UnknownUser)?;
        if !verify_password(password, stored) {
            return Err(StoreError::WrongPassword);
        }

        let token = state.sessions.create(username, self.session_ttl);
        state.sessions.attach(username, &token, handle);
        Ok(token)
    }

    fn validate_session(&self, token: &str) -> Option<String> {
        self.lock().sessions.validate(token)
    }

    fn list_accounts(
        &self,
        pattern: &str,
        page: usize,
        page_size: usize,
    ) -> Result<DirectoryPage, StoreError> {
        let state = self.lock();
        let matched: Vec<String> = state
            .users
            .keys()
            .filter(|name| wildcard_match(pattern, name))
            .cloned()
            .collect();
        Ok(paginate(matched, page, page_size))
    }

    fn enqueue_message(
        &self,
        recipient: &str,
        sender: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.users.contains_key(recipient) {
            return Err(StoreError::UnknownRecipient);
        }
        state
            .queues
            .entry(recipient.to_string())
            .or_default()
            .push(QueuedMessage {
                sender: sender.to_string(),
                message: body.to_string(),
            });
        Ok(())
    }

    fn drain_messages(
        &self,
        username: &str,
        count: i64,
    ) -> Result<(Vec<QueuedMessage>, usize), StoreError> {
        let mut state = self.lock();
        let queue = state.queues.entry(username.to_string()).or_default();

        let drained = if count > 0 {
            // Most recent first.
            let take = (count as usize).min(queue.len());
            let mut tail = queue.split_off(queue.len() - take);
            tail.reverse();
            tail
        } else if count < 0 {
            // Oldest first, in order.
            let take = (count.unsigned_abs() as usize).min(queue.len());
            queue.drain(..take).collect()
        } else {
            Vec::new()
        };

        Ok((drained, queue.len()))
    }

    fn delete_messages(&self, username: &str, count: i64) -> Result<usize, StoreError> {
        let mut state = self.lock();
        let queue = state.queues.entry(username.to_string()).or_default();

        let deleted = if count > 0 {
            let take = (count as usize).min(queue.len());
            queue.truncate(queue.len() - take);
            take
        } else if count < 0 {
            let take = (count.unsigned_abs() as usize).min(queue.len());
            queue.drain(..take);
            take
        } else {
            0
        };

        Ok(deleted)
    }

    fn delete_account(&self, username: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.users.remove(username);
        state.queues.remove(username);
        state.sessions.remove_user(username);
        Ok(())
    }

    fn logout(&self, token: &str) {
        self.lock().sessions.remove_token(token);
    }

    fn connections_for(&self, username: &str) -> Vec<ConnectionHandle> {
        self.lock().sessions.handles_for(username)
    }

    fn sweep_expired_sessions(&self) -> usize {
        self.lock().sessions.sweep()
    }
}
