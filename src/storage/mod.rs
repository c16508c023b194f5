// Account, session, and message-queue storage
//
// One `Store` contract, two interchangeable backends. Sessions and live
// connection registrations are semi-persistent in both backends (a restart
// clears them); accounts and queued messages are what the backends differ
// on. Every operation takes the backend's single lock for its full
// duration, so each call is atomic with respect to every other, the
// background sweep included.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::protocol::Frame;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// Storage failures. The domain variants carry the exact wording clients
/// see in error responses; `Backend` is an internal fault and terminates
/// the offending connection instead of becoming a response.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Username already exists")]
    UsernameTaken,
    #[error("User does not exist")]
    UnknownUser,
    #[error("Incorrect password")]
    WrongPassword,
    #[error("Recipient does not exist")]
    UnknownRecipient,
    #[error("storage backend failure: {0}")]
    Backend(#[from] rusqlite::Error),
}

/// One message waiting in a recipient's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedMessage {
    pub sender: String,
    pub message: String,
}

/// A successful login: the fresh token plus the unread count, reported
/// without consuming the queue.
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub token: String,
    pub unread_count: usize,
}

/// One page of the account directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPage {
    pub accounts: Vec<String>,
    pub page: usize,
    pub total_pages: usize,
}

/// Messages a connection task consumes from its outbound channel.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Encode and write this frame to the socket.
    Frame(Frame),
    /// Close the connection (session expired).
    Shutdown,
}

/// The live handle a session registers for push delivery: the sending side
/// of its connection's outbound channel. The store holds and returns these;
/// it never touches a socket itself.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// Hand a frame to the connection. `false` means the connection is
    /// gone and the caller should fall back to queueing.
    pub fn deliver(&self, frame: Frame) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    /// Ask the connection to close. `false` if it is already gone, which
    /// the sweep tolerates.
    pub fn shutdown(&self) -> bool {
        self.tx.send(Outbound::Shutdown).is_ok()
    }
}

/// The complete server-state contract both backends satisfy.
///
/// Methods are synchronous; callers in async context hold no lock across
/// an await because every method finishes its locking before returning.
pub trait Store: Send + Sync {
    fn account_exists(&self, username: &str) -> Result<bool, StoreError>;

    /// Fails with `UsernameTaken` on a duplicate. Field presence is the
    /// dispatcher's job; the store only enforces uniqueness.
    fn create_account(&self, username: &str, password: &str) -> Result<(), StoreError>;

    /// Authenticate and open a session. `UnknownUser` and `WrongPassword`
    /// stay distinct.
    fn login(&self, username: &str, password: &str) -> Result<LoginSession, StoreError>;

    /// Same authentication path as `login`, additionally registering the
    /// connection handle under the new session for push delivery.
    fn listen(
        &self,
        username: &str,
        password: &str,
        handle: ConnectionHandle,
    ) -> Result<String, StoreError>;

    /// `None` for unknown tokens and for lapsed ones, even before the
    /// sweeper has run.
    fn validate_session(&self, token: &str) -> Option<String>;

    /// Shell-style wildcard directory search, lexicographically sorted,
    /// then paginated. Out-of-range pages are empty, not an error.
    fn list_accounts(
        &self,
        pattern: &str,
        page: usize,
        page_size: usize,
    ) -> Result<DirectoryPage, StoreError>;

    /// Append to the recipient's queue. `UnknownRecipient` (with no side
    /// effect) if the account does not exist.
    fn enqueue_message(&self, recipient: &str, sender: &str, body: &str)
        -> Result<(), StoreError>;

    /// Read and remove messages. Positive count takes the most recent
    /// `count`, returned newest-first; negative takes the oldest
    /// `|count|`, returned oldest-first; zero takes nothing. The remainder
    /// keeps its original order. Also returns the remaining count.
    fn drain_messages(
        &self,
        username: &str,
        count: i64,
    ) -> Result<(Vec<QueuedMessage>, usize), StoreError>;

    /// Discard messages with the same signed direction convention as
    /// `drain_messages`. Returns how many were deleted.
    fn delete_messages(&self, username: &str, count: i64) -> Result<usize, StoreError>;

    /// Atomic cascade: account, queue, every session, every registration.
    fn delete_account(&self, username: &str) -> Result<(), StoreError>;

    /// Remove exactly this session and its registration; sibling sessions
    /// for the same user stay.
    fn logout(&self, token: &str);

    /// Live handles registered for a username, for the dispatcher's
    /// push-or-enqueue decision.
    fn connections_for(&self, username: &str) -> Vec<ConnectionHandle>;

    /// One sweep pass: sever and remove every lapsed session. Returns the
    /// number swept.
    fn sweep_expired_sessions(&self) -> usize;
}

/// Run the reaper: a perpetual background task that sweeps on a fixed
/// interval for the life of the process.
pub fn spawn_session_sweeper(store: Arc<dyn Store>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            let swept = store.sweep_expired_sessions();
            if swept > 0 {
                tracing::debug!("reaped {} expired sessions", swept);
            }
        }
    });
}

struct Session {
    username: String,
    expires_at: SystemTime,
}

/// Sessions plus `username → {token → handle}` registrations, embedded in
/// each backend's locked state. Pure bookkeeping; the owning store decides
/// when to call what under its lock.
#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: HashMap<String, Session>,
    clients: HashMap<String, HashMap<String, ConnectionHandle>>,
}

impl SessionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Open a session for a user, returning the fresh token.
    pub(crate) fn create(&mut self, username: &str, ttl: Duration) -> String {
        let token = crate::auth::generate_token();
        self.sessions.insert(
            token.clone(),
            Session {
                username: username.to_string(),
                expires_at: SystemTime::now() + ttl,
            },
        );
        token
    }

    /// Register a connection handle under an existing session.
    pub(crate) fn attach(&mut self, username: &str, token: &str, handle: ConnectionHandle) {
        self.clients
            .entry(username.to_string())
            .or_default()
            .insert(token.to_string(), handle);
    }

    /// The username a token resolves to, if the token is live right now.
    pub(crate) fn validate(&self, token: &str) -> Option<String> {
        let session = self.sessions.get(token)?;
        if SystemTime::now() <= session.expires_at {
            Some(session.username.clone())
        } else {
            None
        }
    }

    /// Remove one session and its registration, leaving siblings alone.
    pub(crate) fn remove_token(&mut self, token: &str) {
        if let Some(session) = self.sessions.remove(token) {
            if let Some(handles) = self.clients.get_mut(&session.username) {
                handles.remove(token);
            }
        }
    }

    /// Cascade for account deletion: every session and registration for
    /// the user.
    pub(crate) fn remove_user(&mut self, username: &str) {
        self.clients.remove(username);
        self.sessions
            .retain(|_, session| session.username != username);
    }

    pub(crate) fn handles_for(&self, username: &str) -> Vec<ConnectionHandle> {
        self.clients
            .get(username)
            .map(|handles| handles.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Sever and drop every lapsed session. A handle that fails to close
    /// does not stop the sweep of the rest.
    pub(crate) fn sweep(&mut self) -> usize {
        let now = SystemTime::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| now > session.expires_at)
            .map(|(token, _)| token.clone())
            .collect();

        for token in &expired {
            if let Some(session) = self.sessions.remove(token) {
                if let Some(handles) = self.clients.get_mut(&session.username) {
                    if let Some(handle) = handles.remove(token) {
                        handle.shutdown();
                    }
                }
            }
        }

        expired.len()
    }
}

/// Match a shell-style pattern (`*` any run, `?` any single character)
/// against a username.
pub(crate) fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < text.len() {
        if pi < pattern.len() && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < pattern.len() && pattern[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = backtrack {
            // Let the last star absorb one more character and retry.
            pi = star_pi + 1;
            ti = star_ti + 1;
            backtrack = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    while pi < pattern.len() && pattern[pi] == '*' {
        pi += 1;
    }
    pi == pattern.len()
}

/// Sort matches, compute `ceil(matches / page_size)` (minimum 1), and
/// slice out the requested page. Out-of-range pages come back empty.
pub(crate) fn paginate(mut matched: Vec<String>, page: usize, page_size: usize) -> DirectoryPage {
    matched.sort();

    let total_pages = if matched.is_empty() {
        1
    } else {
        (matched.len() - 1) / page_size + 1
    };

    let start = page.saturating_sub(1).saturating_mul(page_size);
    let accounts: Vec<String> = matched.into_iter().skip(start).take(page_size).collect();

    DirectoryPage {
        accounts,
        page,
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_star_and_question() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*", "alice"));
        assert!(wildcard_match("a*", "a"));
        assert!(!wildcard_match("a*", "bob"));
        assert!(wildcard_match("?ob", "bob"));
        assert!(!wildcard_match("?ob", "blob"));
        assert!(wildcard_match("a*e", "alice"));
        assert!(wildcard_match("*li*", "alice"));
        assert!(!wildcard_match("", "x"));
        assert!(wildcard_match("", ""));
    }

    #[test]
    fn wildcard_backtracks_through_stars() {
        assert!(wildcard_match("*ce", "alice"));
        assert!(wildcard_match("a*c*e", "alice"));
        assert!(!wildcard_match("a*z", "alice"));
    }

    #[test]
    fn paginate_slices_sorted_matches() {
        let names = vec!["bob".to_string(), "alice".to_string(), "andy".to_string()];
        let directory = paginate(names, 1, 2);
        assert_eq!(directory.accounts, vec!["alice", "andy"]);
        assert_eq!(directory.total_pages, 2);
    }

    #[test]
    fn paginate_zero_matches_still_one_page() {
        let directory = paginate(vec![], 1, 10);
        assert!(directory.accounts.is_empty());
        assert_eq!(directory.total_pages, 1);
    }

    #[test]
    fn paginate_out_of_range_page_is_empty() {
        let names = vec!["alice".to_string()];
        let directory = paginate(names, 7, 10);
        assert!(directory.accounts.is_empty());
        assert_eq!(directory.page, 7);
        assert_eq!(directory.total_pages, 1);
    }

    #[test]
    fn session_table_expiry_is_checked_at_use() {
        let mut table = SessionTable::new();
        let token = table.create("alice", Duration::from_secs(60));
        assert_eq!(table.validate(&token).as_deref(), Some("alice"));

        let lapsed = table.create("alice", Duration::ZERO);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(table.validate(&lapsed), None);

        // Not yet swept, still never resolves.
        assert_eq!(table.validate(&lapsed), None);
        assert_eq!(table.sweep(), 1);
        assert_eq!(table.validate(&token).as_deref(), Some("alice"));
    }

    #[test]
    fn remove_token_leaves_sibling_sessions() {
        let mut table = SessionTable::new();
        let first = table.create("alice", Duration::from_secs(60));
        let second = table.create("alice", Duration::from_secs(60));

        table.remove_token(&first);
        assert_eq!(table.validate(&first), None);
        assert_eq!(table.validate(&second).as_deref(), Some("alice"));
    }

    #[test]
    fn remove_user_cascades_all_sessions() {
        let mut table = SessionTable::new();
        let first = table.create("alice", Duration::from_secs(60));
        let second = table.create("alice", Duration::from_secs(60));
        let other = table.create("bob", Duration::from_secs(60));

        table.remove_user("alice");
        assert_eq!(table.validate(&first), None);
        assert_eq!(table.validate(&second), None);
        assert_eq!(table.validate(&other).as_deref(), Some("bob"));
    }
}
