//! Database row types. These map directly to SQLite rows and stay
//! distinct from the wire events in retro-types.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub username: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetroRow {
    pub id: String,
    pub name: String,
    pub stage: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRow {
    pub id: String,
    pub retro_id: String,
    pub name: String,
    pub position: i64,
}

/// A card with vote counts derived from the votes table at read time.
/// `votes` is the count for whichever user the query was made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRow {
    pub id: String,
    pub column_id: String,
    pub retro_id: String,
    pub revealed: bool,
    pub votes: u32,
    pub total_votes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRow {
    pub id: String,
    pub card_id: String,
    pub text: String,
    pub author: String,
}

/// A retro's full board as read in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub retro: RetroRow,
    pub columns: Vec<ColumnRow>,
    pub cards: Vec<CardRow>,
    pub contents: Vec<ContentRow>,
}
