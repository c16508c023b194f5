// SQLite storage backend
//
// Accounts and message queues live in tables; sessions and connection
// registrations stay in memory like the other backend (they do not survive
// a restart by design). One persistent connection, serialized by the
// store's lock.

use crate::auth::{hash_password, verify_password};
use crate::storage::{
    paginate, wildcard_match, ConnectionHandle, DirectoryPage, LoginSession, QueuedMessage,
    SessionTable, Store, StoreError,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct SqliteState {
    conn: Connection,
    sessions: SessionTable,
}

pub struct SqliteStore {
    session_ttl: Duration,
    state: Mutex<SqliteState>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, session_ttl: Duration) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?, session_ttl)
    }

    /// A throwaway database for tests.
    pub fn open_in_memory(session_ttl: Duration) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, session_ttl)
    }

    fn with_connection(conn: Connection, session_ttl: Duration) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL
            )",
            [],
        )?;

        // The autoincrement id realizes per-recipient arrival order.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient TEXT NOT NULL,
                sender TEXT NOT NULL,
                body TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient)",
            [],
        )?;

        Ok(Self {
            session_ttl,
            state: Mutex::new(SqliteState {
                conn,
                sessions: SessionTable::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SqliteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn user_hash(conn: &Connection, username: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT password_hash FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )
    .optional()
}

fn unread_count(conn: &Connection, username: &str) -> Result<usize, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE recipient = ?1",
        params![username],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Select up to `limit` queued messages for a recipient, newest or oldest
/// first, returning row ids alongside so the caller can delete them.
fn select_messages(
    conn: &Connection,
    recipient: &str,
    newest_first: bool,
    limit: u64,
) -> Result<Vec<(i64, QueuedMessage)>, rusqlite::Error> {
    let sql = if newest_first {
        "SELECT id, sender, body FROM messages WHERE recipient = ?1 ORDER BY id DESC LIMIT ?2"
    } else {
        "SELECT id, sender, body FROM messages WHERE recipient = ?1 ORDER BY id ASC LIMIT ?2"
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![recipient, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                QueuedMessage {
                    sender: row.get(1)?,
                    message: row.get(2)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn delete_rows(conn: &Connection, ids: &[i64]) -> Result<(), rusqlite::Error> {
    if ids.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("DELETE FROM messages WHERE id IN ({})", placeholders);
    conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
    Ok(())
}

impl Store for SqliteStore {
    fn account_exists(&self, username: &str) -> Result<bool, StoreError> {
        let state = self.lock();
        Ok(user_hash(&state.conn, username)?.is_some())
    }

    fn create_account(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let state = self.lock();
        if user_hash(&state.conn, username)?.is_some() {
            return Err(StoreError::UsernameTaken);
        }
        state.conn.execute(
            "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
            params![username, hash_password(password)],
        )?;
        Ok(())
    }

    fn login(&self, username: &str, password: &str) -> Result<LoginSession, StoreError> {
        let mut state = self.lock();
        let stored = user_hash(&state.conn, username)?.ok_or(StoreError::UnknownUser)?;
        if !verify_password(password, &stored) {
            return Err(StoreError::WrongPassword);
        }

        let unread_count = unread_count(&state.conn, username)?;
        let token = state.sessions.create(username, self.session_ttl);

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
        let stored = user_hash(&state.conn, username)?.ok_or(StoreError::UnknownUser)?;
        if !verify_password(password, &stored) {
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
        let mut stmt = state.conn.prepare("SELECT username FROM users")?;
        let matched = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|name| wildcard_match(pattern, name))
            .collect();

        Ok(paginate(matched, page, page_size))
    }

    fn enqueue_message(
        &self,
        recipient: &str,
        sender: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        let state = self.lock();
        if user_hash(&state.conn, recipient)?.is_none() {
            return Err(StoreError::UnknownRecipient);
        }
        state.conn.execute(
            "INSERT INTO messages (recipient, sender, body) VALUES (?1, ?2, ?3)",
            params![recipient, sender, body],
        )?;
        Ok(())
    }

    fn drain_messages(
        &self,
        username: &str,
        count: i64,
    ) -> Result<(Vec<QueuedMessage>, usize), StoreError> {
        let state = self.lock();

        let rows = if count != 0 {
            select_messages(&state.conn, username, count > 0, count.unsigned_abs())?
        } else {
            Vec::new()
        };

        let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
        delete_rows(&state.conn, &ids)?;

        let messages = rows.into_iter().map(|(_, message)| message).collect();
        let remaining = unread_count(&state.conn, username)?;
        Ok((messages, remaining))
    }

    fn delete_messages(&self, username: &str, count: i64) -> Result<usize, StoreError> {
        let state = self.lock();

        let rows = if count != 0 {
            select_messages(&state.conn, username, count > 0, count.unsigned_abs())?
        } else {
            Vec::new()
        };

        let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
        delete_rows(&state.conn, &ids)?;
        Ok(ids.len())
    }

    fn delete_account(&self, username: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .conn
            .execute("DELETE FROM users WHERE username = ?1", params![username])?;
        state.conn.execute(
            "DELETE FROM messages WHERE recipient = ?1",
            params![username],
        )?;
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
