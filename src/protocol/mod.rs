// Wire records and frame codecs
//
// A connection carries a stream of self-delimited frames; one socket read
// may hold several concatenated frames or a truncated one, so decoding
// always yields zero-to-many records.

pub mod compact;
pub mod json;

pub use compact::CompactCodec;
pub use json::JsonCodec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every action name the relay understands, in wire-table order.
///
/// The compact codec indexes into this table, so the order is part of the
/// wire format and must not be reshuffled.
pub const ACTION_NAMES: [&str; 10] = [
    "create_account",
    "login",
    "listen",
    "list_accounts",
    "send_message",
    "receive_message",
    "read_messages",
    "delete_messages",
    "logout",
    "delete_account",
];

/// Request kinds the dispatcher handles.
///
/// `ReceiveMessage` is server-initiated push only; a client sending it gets
/// the same invalid-request error as any unknown name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateAccount,
    Login,
    Listen,
    ListAccounts,
    SendMessage,
    ReceiveMessage,
    ReadMessages,
    DeleteMessages,
    Logout,
    DeleteAccount,
}

impl Action {
    /// Parse a wire action name. Unknown names return `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let idx = ACTION_NAMES.iter().position(|n| *n == name)?;
        Self::from_index(idx)
    }

    /// The action's position in the wire table.
    pub fn index(self) -> usize {
        match self {
            Action::CreateAccount => 0,
            Action::Login => 1,
            Action::Listen => 2,
            Action::ListAccounts => 3,
            Action::SendMessage => 4,
            Action::ReceiveMessage => 5,
            Action::ReadMessages => 6,
            Action::DeleteMessages => 7,
            Action::Logout => 8,
            Action::DeleteAccount => 9,
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Action::CreateAccount),
            1 => Some(Action::Login),
            2 => Some(Action::Listen),
            3 => Some(Action::ListAccounts),
            4 => Some(Action::SendMessage),
            5 => Some(Action::ReceiveMessage),
            6 => Some(Action::ReadMessages),
            7 => Some(Action::DeleteMessages),
            8 => Some(Action::Logout),
            9 => Some(Action::DeleteAccount),
            _ => None,
        }
    }

    /// The wire name for this action.
    pub fn name(self) -> &'static str {
        ACTION_NAMES[self.index()]
    }
}

/// Success or failure of a handled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// One complete request, response, or push record.
///
/// Requests carry `{action, data}`; responses add `status` and either
/// `data` or `error`. Absent fields stay absent across encode/decode; a
/// request never grows a `status` field by round-tripping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Frame {
    /// A client request: `{action, data}`.
    pub fn request(action: &str, data: Value) -> Self {
        Self {
            action: action.to_string(),
            status: None,
            error: None,
            data: Some(data),
        }
    }

    /// A bare success response.
    pub fn success(action: &str) -> Self {
        Self {
            action: action.to_string(),
            status: Some(Status::Success),
            error: None,
            data: None,
        }
    }

    /// A success response carrying a payload.
    pub fn success_with(action: &str, data: Value) -> Self {
        Self {
            action: action.to_string(),
            status: Some(Status::Success),
            error: None,
            data: Some(data),
        }
    }

    /// An error response.
    pub fn error(action: &str, message: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            status: Some(Status::Error),
            error: Some(message.into()),
            data: None,
        }
    }

    /// The unsolicited push record delivered to a listening connection.
    pub fn push_message(sender: &str, message: &str) -> Self {
        Self::request(
            "receive_message",
            serde_json::json!({ "sender": sender, "message": message }),
        )
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(Status::Success)
    }
}

/// Codec failures surfaced to callers.
///
/// Decoding never fails (malformed spans are dropped so one bad record
/// cannot poison a connection) but encoding a frame can.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One contract, two interchangeable codecs.
pub trait FrameCodec: Send + Sync {
    /// Encode one record to bytes.
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, ProtocolError>;

    /// Decode every complete record in the buffer.
    ///
    /// Returns zero-to-many frames: the buffer may hold several
    /// back-to-back records, a truncated tail (ignored), or spans that fail
    /// to parse (dropped; later valid spans are still returned).
    fn decode(&self, buf: &[u8]) -> Vec<Frame>;
}
