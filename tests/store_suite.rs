// Behavioral suite for the storage contract, run unchanged against both
// backends.

use parley::storage::{ConnectionHandle, MemoryStore, Outbound, SqliteStore, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const TTL: Duration = Duration::from_secs(60);

fn backends() -> Vec<(&'static str, Arc<dyn Store>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new(TTL))),
        (
            "sqlite",
            Arc::new(SqliteStore::open_in_memory(TTL).unwrap()),
        ),
    ]
}

fn short_lived_backends() -> Vec<(&'static str, Arc<dyn Store>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new(Duration::ZERO))),
        (
            "sqlite",
            Arc::new(SqliteStore::open_in_memory(Duration::ZERO).unwrap()),
        ),
    ]
}

fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnectionHandle::new(tx), rx)
}

#[test]
fn create_account_succeeds_once() {
    for (name, store) in backends() {
        store.create_account("alice", "pw").unwrap();
        let err = store.create_account("alice", "pw").unwrap_err();
        assert_eq!(err.to_string(), "Username already exists", "{}", name);
    }
}

#[test]
fn login_failures_are_distinct() {
    for (name, store) in backends() {
        store.create_account("alice", "pw").unwrap();

        let err = store.login("nobody", "pw").unwrap_err();
        assert_eq!(err.to_string(), "User does not exist", "{}", name);

        let err = store.login("alice", "wrong").unwrap_err();
        assert_eq!(err.to_string(), "Incorrect password", "{}", name);
    }
}

#[test]
fn login_reports_unread_without_consuming() {
    for (name, store) in backends() {
        store.create_account("alice", "pw").unwrap();
        store.create_account("bob", "pw").unwrap();
        store.enqueue_message("bob", "alice", "one").unwrap();
        store.enqueue_message("bob", "alice", "two").unwrap();

        let first = store.login("bob", "pw").unwrap();
        assert_eq!(first.unread_count, 2, "{}", name);

        // Still there for the next login.
        let second = store.login("bob", "pw").unwrap();
        assert_eq!(second.unread_count, 2, "{}", name);

        // Both sessions are valid concurrently (multi-device).
        assert_eq!(store.validate_session(&first.token).as_deref(), Some("bob"));
        assert_eq!(store.validate_session(&second.token).as_deref(), Some("bob"));
    }
}

#[test]
fn validate_session_rejects_unknown_and_lapsed_tokens() {
    for (name, store) in backends() {
        store.create_account("alice", "pw").unwrap();
        let session = store.login("alice", "pw").unwrap();

        assert_eq!(
            store.validate_session(&session.token).as_deref(),
            Some("alice"),
            "{}",
            name
        );
        assert_eq!(store.validate_session("no-such-token"), None, "{}", name);
    }

    for (name, store) in short_lived_backends() {
        store.create_account("alice", "pw").unwrap();
        let session = store.login("alice", "pw").unwrap();

        std::thread::sleep(Duration::from_millis(20));

        // Lapsed but not yet swept: still never resolves.
        assert_eq!(store.validate_session(&session.token), None, "{}", name);
    }
}

#[test]
fn drain_positive_newest_first_negative_oldest_first() {
    for (name, store) in backends() {
        store.create_account("bob", "pw").unwrap();
        for body in ["one", "two", "three", "four", "five"] {
            store.enqueue_message("bob", "alice", body).unwrap();
        }

        let (newest, remaining) = store.drain_messages("bob", 2).unwrap();
        let bodies: Vec<&str> = newest.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["five", "four"], "{}", name);
        assert_eq!(remaining, 3, "{}", name);

        let (oldest, remaining) = store.drain_messages("bob", -2).unwrap();
        let bodies: Vec<&str> = oldest.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"], "{}", name);
        assert_eq!(remaining, 1, "{}", name);

        // The survivor is the middle message.
        let (rest, remaining) = store.drain_messages("bob", -5).unwrap();
        assert_eq!(rest[0].message, "three", "{}", name);
        assert_eq!(remaining, 0, "{}", name);
    }
}

#[test]
fn drain_more_than_queued_takes_everything() {
    for (name, store) in backends() {
        store.create_account("bob", "pw").unwrap();
        store.enqueue_message("bob", "alice", "only").unwrap();

        let (messages, remaining) = store.drain_messages("bob", 100).unwrap();
        assert_eq!(messages.len(), 1, "{}", name);
        assert_eq!(remaining, 0, "{}", name);
    }
}

#[test]
fn drain_zero_touches_nothing() {
    for (name, store) in backends() {
        store.create_account("bob", "pw").unwrap();
        store.enqueue_message("bob", "alice", "hi").unwrap();

        let (messages, remaining) = store.drain_messages("bob", 0).unwrap();
        assert!(messages.is_empty(), "{}", name);
        assert_eq!(remaining, 1, "{}", name);
    }
}

#[test]
fn delete_messages_follows_drain_direction() {
    for (name, store) in backends() {
        store.create_account("bob", "pw").unwrap();
        for body in ["one", "two", "three", "four"] {
            store.enqueue_message("bob", "alice", body).unwrap();
        }

        // Positive discards the newest two.
        assert_eq!(store.delete_messages("bob", 2).unwrap(), 2, "{}", name);
        // Negative discards the oldest.
        assert_eq!(store.delete_messages("bob", -1).unwrap(), 1, "{}", name);

        let (rest, _) = store.drain_messages("bob", -10).unwrap();
        let bodies: Vec<&str> = rest.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["two"], "{}", name);

        assert_eq!(store.delete_messages("bob", 10).unwrap(), 0, "{}", name);
    }
}

#[test]
fn enqueue_to_unknown_recipient_is_an_error() {
    for (name, store) in backends() {
        let err = store.enqueue_message("ghost", "alice", "boo").unwrap_err();
        assert_eq!(err.to_string(), "Recipient does not exist", "{}", name);
    }
}

#[test]
fn directory_matches_sort_and_paginate() {
    for (name, store) in backends() {
        for user in ["alice", "andy", "bob"] {
            store.create_account(user, "pw").unwrap();
        }

        let page = store.list_accounts("a*", 1, 2).unwrap();
        assert_eq!(page.accounts, vec!["alice", "andy"], "{}", name);
        assert_eq!(page.page, 1, "{}", name);
        assert_eq!(page.total_pages, 1, "{}", name);

        let page = store.list_accounts("*", 2, 2).unwrap();
        assert_eq!(page.accounts, vec!["bob"], "{}", name);
        assert_eq!(page.total_pages, 2, "{}", name);

        // Out of range: empty slice, not an error.
        let page = store.list_accounts("*", 9, 2).unwrap();
        assert!(page.accounts.is_empty(), "{}", name);

        // Zero matches still report one page.
        let page = store.list_accounts("z*", 1, 10).unwrap();
        assert!(page.accounts.is_empty(), "{}", name);
        assert_eq!(page.total_pages, 1, "{}", name);

        let page = store.list_accounts("?ob", 1, 10).unwrap();
        assert_eq!(page.accounts, vec!["bob"], "{}", name);
    }
}

#[test]
fn delete_account_cascades_everything() {
    for (name, store) in backends() {
        store.create_account("alice", "pw").unwrap();
        store.create_account("bob", "pw").unwrap();
        store.enqueue_message("alice", "bob", "hi").unwrap();

        let first = store.login("alice", "pw").unwrap();
        let second = store.login("alice", "pw").unwrap();
        let (conn, _rx) = handle();
        let listening = store.listen("alice", "pw", conn).unwrap();

        store.delete_account("alice").unwrap();

        assert!(!store.account_exists("alice").unwrap(), "{}", name);
        assert_eq!(store.validate_session(&first.token), None, "{}", name);
        assert_eq!(store.validate_session(&second.token), None, "{}", name);
        assert_eq!(store.validate_session(&listening), None, "{}", name);
        assert!(store.connections_for("alice").is_empty(), "{}", name);

        let page = store.list_accounts("*", 1, 10).unwrap();
        assert_eq!(page.accounts, vec!["bob"], "{}", name);
    }
}

#[test]
fn logout_removes_one_session_only() {
    for (name, store) in backends() {
        store.create_account("alice", "pw").unwrap();
        let phone = store.login("alice", "pw").unwrap();
        let laptop = store.login("alice", "pw").unwrap();

        store.logout(&phone.token);

        assert_eq!(store.validate_session(&phone.token), None, "{}", name);
        assert_eq!(
            store.validate_session(&laptop.token).as_deref(),
            Some("alice"),
            "{}",
            name
        );
    }
}

#[test]
fn listen_registers_a_live_handle() {
    for (name, store) in backends() {
        store.create_account("bob", "pw").unwrap();
        assert!(store.connections_for("bob").is_empty(), "{}", name);

        let (conn, mut rx) = handle();
        let token = store.listen("bob", "pw", conn).unwrap();

        let handles = store.connections_for("bob");
        assert_eq!(handles.len(), 1, "{}", name);
        assert!(handles[0].deliver(parley::Frame::push_message("alice", "hi")));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))), "{}", name);

        // Logout drops the registration.
        store.logout(&token);
        assert!(store.connections_for("bob").is_empty(), "{}", name);
    }
}

#[tokio::test]
async fn sweep_severs_expired_connections() {
    for (name, store) in short_lived_backends() {
        store.create_account("bob", "pw").unwrap();
        let (conn, mut rx) = handle();
        let token = store.listen("bob", "pw", conn).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.sweep_expired_sessions(), 1, "{}", name);
        assert!(matches!(rx.try_recv(), Ok(Outbound::Shutdown)), "{}", name);
        assert_eq!(store.validate_session(&token), None, "{}", name);
        assert!(store.connections_for("bob").is_empty(), "{}", name);

        // Nothing left to sweep.
        assert_eq!(store.sweep_expired_sessions(), 0, "{}", name);
    }
}

#[tokio::test]
async fn sweep_tolerates_dead_handles() {
    for (name, store) in short_lived_backends() {
        store.create_account("alice", "pw").unwrap();
        store.create_account("bob", "pw").unwrap();

        // One listener's channel is already gone.
        let (dead, dead_rx) = handle();
        store.listen("alice", "pw", dead).unwrap();
        drop(dead_rx);

        let (live, mut live_rx) = handle();
        store.listen("bob", "pw", live).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        // The dead handle does not stop the rest of the sweep.
        assert_eq!(store.sweep_expired_sessions(), 2, "{}", name);
        assert!(matches!(live_rx.try_recv(), Ok(Outbound::Shutdown)), "{}", name);
    }
}
