use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One message on the WebSocket, in either direction.
///
/// `data` carries the per-operation payload as a JSON-encoded string. Messages
/// sent by the server never carry `auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Username the message originated from, empty if sent by the server.
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<EnvelopeAuth>,

    pub op: String,

    #[serde(default)]
    pub data: String,
}

/// Proof of identity attached to every client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeAuth {
    pub username: String,
    pub token: String,
}

impl Envelope {
    /// Decode `data` into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.data)
    }
}

/// Data of the `error` op sent when a message fails authentication.
pub const BAD_AUTH: &str = "bad_auth";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEvent {
    pub stage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnEvent {
    pub column_id: String,
    pub name: String,
}

/// `votes` is the receiving user's own vote count, `total_votes` everyone's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardEvent {
    pub column_id: String,
    pub card_id: String,
    pub revealed: bool,
    pub votes: u32,
    pub total_votes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEvent {
    pub column_id: String,
    pub card_id: String,
    pub content_id: String,
    pub card_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveEvent {
    pub column_from: String,
    pub column_to: String,
    pub card_id: String,
}

/// Shared by `reveal` and `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRefEvent {
    pub column_id: String,
    pub card_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEvent {
    pub column_from: String,
    pub card_from: String,
    pub column_to: String,
    pub card_to: String,
}

/// Counts after the vote was applied. `user_votes` belongs to the envelope's
/// origin user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEvent {
    pub column_id: String,
    pub card_id: String,
    pub user_votes: u32,
    pub total_votes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetroEvent {
    pub id: String,
    pub name: String,
    pub stage: String,
    pub created_at: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    pub username: String,
}

/// Everything the server sends to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Stage(StageEvent),
    Column(ColumnEvent),
    Card(CardEvent),
    Content(ContentEvent),
    Move(MoveEvent),
    Reveal(CardRefEvent),
    Group(GroupEvent),
    Vote(VoteEvent),
    Unvote(VoteEvent),
    Delete(CardRefEvent),
    Retro(RetroEvent),
    User(UserEvent),
    Error(String),
}

impl Event {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Stage(_) => "stage",
            Self::Column(_) => "column",
            Self::Card(_) => "card",
            Self::Content(_) => "content",
            Self::Move(_) => "move",
            Self::Reveal(_) => "reveal",
            Self::Group(_) => "group",
            Self::Vote(_) => "vote",
            Self::Unvote(_) => "unvote",
            Self::Delete(_) => "delete",
            Self::Retro(_) => "retro",
            Self::User(_) => "user",
            Self::Error(_) => "error",
        }
    }

    /// Wrap the event for the wire. `origin` is the username responsible for
    /// it, or empty for purely server-side events.
    pub fn into_envelope(self, origin: &str) -> Envelope {
        let op = self.op().to_string();
        let data = match self {
            Self::Stage(e) => serde_json::to_string(&e),
            Self::Column(e) => serde_json::to_string(&e),
            Self::Card(e) => serde_json::to_string(&e),
            Self::Content(e) => serde_json::to_string(&e),
            Self::Move(e) => serde_json::to_string(&e),
            Self::Reveal(e) | Self::Delete(e) => serde_json::to_string(&e),
            Self::Group(e) => serde_json::to_string(&e),
            Self::Vote(e) | Self::Unvote(e) => serde_json::to_string(&e),
            Self::Retro(e) => serde_json::to_string(&e),
            Self::User(e) => serde_json::to_string(&e),
            // The error code goes out bare, not JSON-quoted.
            Self::Error(code) => Ok(code),
        };

        Envelope {
            id: origin.to_string(),
            auth: None,
            op,
            // Plain structs of strings and numbers always serialize.
            data: data.unwrap_or_default(),
        }
    }
}
