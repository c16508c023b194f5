// Request dispatcher
//
// Stateless mapping from an action to store calls plus optional push
// delivery. Domain and validation failures become error responses; a
// backend fault propagates as `Err` and terminates the connection that
// triggered it.

use crate::protocol::{Action, Frame};
use crate::storage::{ConnectionHandle, QueuedMessage, Store, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct RequestHandler {
    store: Arc<dyn Store>,
}

impl RequestHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Process one request record and build the response record.
    ///
    /// `conn` is the handle of the connection the request arrived on; the
    /// `listen` action registers it for push delivery.
    pub fn process(&self, request: &Frame, conn: &ConnectionHandle) -> Result<Frame, StoreError> {
        let action_name = request.action.as_str();
        let data = request.data.as_ref().unwrap_or(&Value::Null);

        let Some(action) = Action::parse(action_name) else {
            return Ok(Frame::error(action_name, "Invalid request"));
        };

        match action {
            Action::CreateAccount => self.create_account(data),
            Action::Login => self.login(data),
            Action::Listen => self.listen(data, conn),
            Action::ListAccounts => self.list_accounts(data),
            Action::SendMessage => self.send_message(data),
            Action::ReadMessages => self.read_messages(data),
            Action::DeleteMessages => self.delete_messages(data),
            Action::Logout => self.logout(data),
            Action::DeleteAccount => self.delete_account(data),
            // Push records are server-initiated only.
            Action::ReceiveMessage => Ok(Frame::error(action_name, "Invalid request")),
        }
    }

    fn create_account(&self, data: &Value) -> Result<Frame, StoreError> {
        let action = Action::CreateAccount.name();
        let (Some(username), Some(password)) =
            (text_field(data, "username"), text_field(data, "password"))
        else {
            return Ok(Frame::error(action, "Missing username or password"));
        };

        match self.store.create_account(username, password) {
            Ok(()) => Ok(Frame::success(action)),
            Err(e) => domain_error(action, e),
        }
    }

    fn login(&self, data: &Value) -> Result<Frame, StoreError> {
        let action = Action::Login.name();
        let username = text_field(data, "username").unwrap_or("");
        let password = text_field(data, "password").unwrap_or("");

        match self.store.login(username, password) {
            Ok(session) => Ok(Frame::success_with(
                action,
                json!({
                    "session_token": session.token,
                    "unread_message_count": session.unread_count,
                }),
            )),
            Err(e) => domain_error(action, e),
        }
    }

    fn listen(&self, data: &Value, conn: &ConnectionHandle) -> Result<Frame, StoreError> {
        let action = Action::Listen.name();
        let username = text_field(data, "username").unwrap_or("");
        let password = text_field(data, "password").unwrap_or("");

        match self.store.listen(username, password, conn.clone()) {
            Ok(token) => Ok(Frame::success_with(
                action,
                json!({ "session_token": token }),
            )),
            Err(e) => domain_error(action, e),
        }
    }

    fn list_accounts(&self, data: &Value) -> Result<Frame, StoreError> {
        let action = Action::ListAccounts.name();
        if self.authorize(data).is_none() {
            return Ok(Frame::error(action, "Invalid session"));
        }

        let pattern = data
            .get("pattern")
            .and_then(Value::as_str)
            .unwrap_or("*");

        let page = int_field(data, "page").map(|v| v.unwrap_or(1));
        let page_size = int_field(data, "page_size").map(|v| v.unwrap_or(10));
        let (Ok(page), Ok(page_size)) = (page, page_size) else {
            return Ok(Frame::error(action, "Invalid page or page size"));
        };
        if page <= 0 || page_size <= 0 {
            return Ok(Frame::error(action, "Invalid page or page size"));
        }

        let directory = self
            .store
            .list_accounts(pattern, page as usize, page_size as usize)?;

        Ok(Frame::success_with(
            action,
            json!({
                "accounts": directory.accounts,
                "page": directory.page,
                "total_pages": directory.total_pages,
            }),
        ))
    }

    fn send_message(&self, data: &Value) -> Result<Frame, StoreError> {
        let action = Action::SendMessage.name();
        let Some(sender) = self.authorize(data) else {
            return Ok(Frame::error(action, "Invalid session"));
        };

        let (Some(recipient), Some(message)) =
            (text_field(data, "recipient"), text_field(data, "message"))
        else {
            return Ok(Frame::error(action, "Missing recipient or message"));
        };

        if !self.store.account_exists(recipient)? {
            return Ok(Frame::error(action, "Recipient does not exist"));
        }

        // Try every live connection first; only if no push lands does the
        // message go to the durable queue.
        let push = Frame::push_message(&sender, message);
        let mut delivered = false;
        for handle in self.store.connections_for(recipient) {
            if handle.deliver(push.clone()) {
                delivered = true;
            } else {
                tracing::warn!("push to a dead connection of {} skipped", recipient);
            }
        }

        if !delivered {
            match self.store.enqueue_message(recipient, &sender, message) {
                Ok(()) => {}
                Err(e) => return domain_error(action, e),
            }
            tracing::debug!("queued message from {} for offline {}", sender, recipient);
        }

        Ok(Frame::success(action))
    }

    fn read_messages(&self, data: &Value) -> Result<Frame, StoreError> {
        let action = Action::ReadMessages.name();
        let Some(username) = self.authorize(data) else {
            return Ok(Frame::error(action, "Invalid session"));
        };

        let Ok(count) = int_field(data, "num_to_read") else {
            return Ok(Frame::error(action, "Invalid number of messages to read"));
        };
        let count = count.unwrap_or(1);

        let (messages, remaining) = self.store.drain_messages(&username, count)?;
        Ok(Frame::success_with(
            action,
            json!({
                "unread_messages": message_values(&messages),
                "remaining_unread_count": remaining,
            }),
        ))
    }

    fn delete_messages(&self, data: &Value) -> Result<Frame, StoreError> {
        let action = Action::DeleteMessages.name();
        let Some(username) = self.authorize(data) else {
            return Ok(Frame::error(action, "Invalid session"));
        };

        let Ok(Some(count)) = int_field(data, "num_to_delete") else {
            return Ok(Frame::error(
                action,
                "Invalid number of messages to delete",
            ));
        };

        let deleted = self.store.delete_messages(&username, count)?;
        Ok(Frame::success_with(
            action,
            json!({ "num_messages_deleted": deleted }),
        ))
    }

    fn logout(&self, data: &Value) -> Result<Frame, StoreError> {
        let action = Action::Logout.name();
        if self.authorize(data).is_none() {
            return Ok(Frame::error(action, "Invalid session"));
        }

        // Token presence is guaranteed: authorize just resolved it.
        if let Some(token) = data.get("session_token").and_then(Value::as_str) {
            self.store.logout(token);
        }
        Ok(Frame::success(action))
    }

    fn delete_account(&self, data: &Value) -> Result<Frame, StoreError> {
        let action = Action::DeleteAccount.name();
        let Some(username) = self.authorize(data) else {
            return Ok(Frame::error(action, "Invalid session"));
        };

        // Identity comes from the session, never from the request body.
        self.store.delete_account(&username)?;
        Ok(Frame::success(action))
    }

    /// Resolve the request's session token. The response wording never
    /// reveals whether the token was unknown or merely lapsed.
    fn authorize(&self, data: &Value) -> Option<String> {
        let token = data.get("session_token")?.as_str()?;
        self.store.validate_session(token)
    }
}

/// A required text field: present, a string, and non-empty.
fn text_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    match data.get(key)?.as_str()? {
        "" => None,
        s => Some(s),
    }
}

/// An optional integer field that also accepts numeric strings.
/// `Ok(None)` means absent; `Err(())` means present but not a number.
fn int_field(data: &Value, key: &str) -> Result<Option<i64>, ()> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or(()),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| ()),
        Some(_) => Err(()),
    }
}

fn message_values(messages: &[QueuedMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({ "sender": m.sender, "message": m.message }))
        .collect()
}

/// Turn a domain failure into an error response; backend faults propagate
/// and end the connection instead.
fn domain_error(action: &str, err: StoreError) -> Result<Frame, StoreError> {
    match err {
        StoreError::Backend(_) => Err(err),
        other => Ok(Frame::error(action, other.to_string())),
    }
}
