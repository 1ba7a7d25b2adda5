use serde::{Deserialize, Serialize};

/// Operations a client can request, one variant per wire `op` name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    JoinRetro(JoinRetro),
    Add(AddCard),
    Edit(EditContent),
    Move(MoveCard),
    Stage(SetStage),
    Reveal(CardRef),
    Group(GroupCards),
    Vote(CardRef),
    Unvote(CardRef),
    Delete(CardRef),
    CreateRetro(CreateRetro),
    Menu,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRetro {
    pub retro_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCard {
    pub column_id: String,
    pub card_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditContent {
    pub content_id: String,
    pub card_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveCard {
    pub column_from: String,
    pub column_to: String,
    pub card_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStage {
    pub stage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRef {
    pub card_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCards {
    pub card_from: String,
    pub card_to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRetro {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
}

type Decoder = fn(&str) -> serde_json::Result<Operation>;

/// Op name -> payload decoder.
const DECODERS: &[(&str, Decoder)] = &[
    ("joinRetro", |d: &str| serde_json::from_str(d).map(Operation::JoinRetro)),
    ("add", |d: &str| serde_json::from_str(d).map(Operation::Add)),
    ("edit", |d: &str| serde_json::from_str(d).map(Operation::Edit)),
    ("move", |d: &str| serde_json::from_str(d).map(Operation::Move)),
    ("stage", |d: &str| serde_json::from_str(d).map(Operation::Stage)),
    ("reveal", |d: &str| serde_json::from_str(d).map(Operation::Reveal)),
    ("group", |d: &str| serde_json::from_str(d).map(Operation::Group)),
    ("vote", |d: &str| serde_json::from_str(d).map(Operation::Vote)),
    ("unvote", |d: &str| serde_json::from_str(d).map(Operation::Unvote)),
    ("delete", |d: &str| serde_json::from_str(d).map(Operation::Delete)),
    ("createRetro", |d: &str| serde_json::from_str(d).map(Operation::CreateRetro)),
    ("menu", |_: &str| Ok(Operation::Menu)),
];

impl Operation {
    /// Decode the payload of a named op.
    ///
    /// Returns `Ok(None)` for names with no registered decoder, and `Err` when
    /// the name is known but `data` doesn't match its schema.
    pub fn decode(op: &str, data: &str) -> serde_json::Result<Option<Self>> {
        match DECODERS.iter().find(|(name, _)| *name == op) {
            Some((_, decode)) => decode(data).map(Some),
            None => Ok(None),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRetro(_) => "joinRetro",
            Self::Add(_) => "add",
            Self::Edit(_) => "edit",
            Self::Move(_) => "move",
            Self::Stage(_) => "stage",
            Self::Reveal(_) => "reveal",
            Self::Group(_) => "group",
            Self::Vote(_) => "vote",
            Self::Unvote(_) => "unvote",
            Self::Delete(_) => "delete",
            Self::CreateRetro(_) => "createRetro",
            Self::Menu => "menu",
        }
    }
}
