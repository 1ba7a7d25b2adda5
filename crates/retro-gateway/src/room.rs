use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};
use uuid::Uuid;

use retro_db::Database;
use retro_db::models::{CardRow, ColumnRow, ContentRow, RetroRow};
use retro_types::events::{
    CardEvent, CardRefEvent, ColumnEvent, ContentEvent, Envelope, Event, GroupEvent, MoveEvent,
    RetroEvent, StageEvent, UserEvent, VoteEvent,
};
use retro_types::ops::{
    AddCard, CardRef, CreateRetro, EditContent, GroupCards, JoinRetro, MoveCard, Operation,
    SetStage,
};

use crate::conn::Conn;
use crate::mux::Handler;

/// Columns every new retro starts with, left to right.
pub const DEFAULT_COLUMNS: [&str; 5] = ["Start", "More", "Keep", "Less", "Stop"];

/// Board operations. Holds no board state of its own: the database is the
/// single owner, and every event is broadcast only after the write it
/// describes has committed.
pub struct Room {
    db: Arc<Database>,
}

impl Handler for Room {
    fn handle(&self, conn: &mut Conn, op: Operation) {
        let name = op.name();
        let result = match op {
            Operation::JoinRetro(req) => self.join_retro(conn, req),
            Operation::Add(req) => self.add(conn, req),
            Operation::Edit(req) => self.edit(conn, req),
            Operation::Move(req) => self.move_card(conn, req),
            Operation::Stage(req) => self.stage(conn, req),
            Operation::Reveal(req) => self.reveal(conn, req),
            Operation::Group(req) => self.group(conn, req),
            Operation::Vote(req) => self.vote(conn, req),
            Operation::Unvote(req) => self.unvote(conn, req),
            Operation::Delete(req) => self.delete(conn, req),
            Operation::CreateRetro(req) => self.create_retro(conn, req),
            Operation::Menu => self.menu(conn),
        };

        if let Err(e) = result {
            warn!("{} {} abandoned: {:#}", conn.name(), name, e);
        }
    }
}

impl Room {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Scope the connection to the retro and replay the board to it: stage,
    /// then columns, then cards, then content.
    ///
    /// The board is read, the connection scoped and the replay queued while
    /// storage is locked. Any broadcast queued after the replay describes a
    /// later write; one queued before it only repeats what the replay holds.
    fn join_retro(&self, conn: &mut Conn, req: JoinRetro) -> Result<()> {
        let username = conn.name().to_string();

        let joined = self.db.with_board(&req.retro_id, &username, |board| {
            conn.join(&board.retro.id);

            if !board.retro.stage.is_empty() {
                let stage = StageEvent {
                    stage: board.retro.stage,
                };
                conn.send(Event::Stage(stage).into_envelope(""));
            }
            for column in board.columns {
                conn.send(
                    Event::Column(ColumnEvent {
                        column_id: column.id,
                        name: column.name,
                    })
                    .into_envelope(""),
                );
            }

            let mut card_columns = HashMap::new();
            for card in board.cards {
                card_columns.insert(card.id.clone(), card.column_id.clone());
                conn.send(card_event(card));
            }
            for content in board.contents {
                let column_id = card_columns.get(&content.card_id).cloned().unwrap_or_default();
                conn.send(content_event(&column_id, content));
            }

            board.retro.id
        })?;

        let retro_id = joined.ok_or_else(|| anyhow!("no retro {}", req.retro_id))?;
        info!("{} joined retro {}", username, retro_id);
        Ok(())
    }

    fn add(&self, conn: &mut Conn, req: AddCard) -> Result<()> {
        let column = self.column_in_retro(conn, &req.column_id)?;

        let card_id = new_id();
        let content = ContentRow {
            id: new_id(),
            card_id: card_id.clone(),
            text: req.card_text,
            author: conn.name().to_string(),
        };
        self.db
            .add_card(&card_id, &column.id, &content)
            .context("storing card")?;

        conn.broadcast(
            Event::Card(CardEvent {
                column_id: column.id.clone(),
                card_id,
                revealed: false,
                votes: 0,
                total_votes: 0,
            })
            .into_envelope(""),
        );
        conn.broadcast(content_event(&column.id, content));
        Ok(())
    }

    fn edit(&self, conn: &mut Conn, req: EditContent) -> Result<()> {
        let mut content = self
            .db
            .get_content(&req.content_id)?
            .ok_or_else(|| anyhow!("no content {}", req.content_id))?;
        let card = self.card_in_retro(conn, &content.card_id)?;

        if content.author != conn.name() {
            bail!("content {} belongs to {}", content.id, content.author);
        }

        self.db.update_content(&content.id, &req.card_text)?;
        content.text = req.card_text;

        conn.broadcast(content_event(&card.column_id, content));
        Ok(())
    }

    fn move_card(&self, conn: &mut Conn, req: MoveCard) -> Result<()> {
        let card = self.card_in_retro(conn, &req.card_id)?;
        if card.column_id != req.column_from {
            bail!("card {} is not in column {}", card.id, req.column_from);
        }
        let target = self.column_in_retro(conn, &req.column_to)?;

        self.db.move_card(&card.id, &target.id)?;

        conn.broadcast(
            Event::Move(MoveEvent {
                column_from: req.column_from,
                column_to: target.id,
                card_id: card.id,
            })
            .into_envelope(conn.name()),
        );
        Ok(())
    }

    fn stage(&self, conn: &mut Conn, req: SetStage) -> Result<()> {
        let retro_id = joined_retro(conn)?;
        self.db.set_stage(&retro_id, &req.stage)?;

        conn.broadcast(Event::Stage(StageEvent { stage: req.stage }).into_envelope(conn.name()));
        Ok(())
    }

    fn reveal(&self, conn: &mut Conn, req: CardRef) -> Result<()> {
        let card = self.card_in_retro(conn, &req.card_id)?;
        self.db.reveal_card(&card.id)?;

        conn.broadcast(
            Event::Reveal(CardRefEvent {
                column_id: card.column_id,
                card_id: card.id,
            })
            .into_envelope(conn.name()),
        );
        Ok(())
    }

    fn group(&self, conn: &mut Conn, req: GroupCards) -> Result<()> {
        if req.card_from == req.card_to {
            bail!("cannot group card {} with itself", req.card_from);
        }
        let from = self.card_in_retro(conn, &req.card_from)?;
        let to = self.card_in_retro(conn, &req.card_to)?;

        self.db.group_cards(&from.id, &to.id)?;

        conn.broadcast(
            Event::Group(GroupEvent {
                column_from: from.column_id,
                card_from: from.id,
                column_to: to.column_id,
                card_to: to.id,
            })
            .into_envelope(conn.name()),
        );
        Ok(())
    }

    fn vote(&self, conn: &mut Conn, req: CardRef) -> Result<()> {
        let card = self.card_in_retro(conn, &req.card_id)?;
        self.db.vote(conn.name(), &card.id)?;

        let event = self.vote_event(conn, card)?;
        conn.broadcast(Event::Vote(event).into_envelope(conn.name()));
        Ok(())
    }

    /// Removes the caller's oldest vote. Without one there is nothing to
    /// undo and nothing is broadcast.
    fn unvote(&self, conn: &mut Conn, req: CardRef) -> Result<()> {
        let card = self.card_in_retro(conn, &req.card_id)?;
        if !self.db.unvote(conn.name(), &card.id)? {
            debug!("{} has no vote on {} to remove", conn.name(), card.id);
            return Ok(());
        }

        let event = self.vote_event(conn, card)?;
        conn.broadcast(Event::Unvote(event).into_envelope(conn.name()));
        Ok(())
    }

    fn delete(&self, conn: &mut Conn, req: CardRef) -> Result<()> {
        let card = self.card_in_retro(conn, &req.card_id)?;
        self.db.delete_card(&card.id)?;

        conn.broadcast(
            Event::Delete(CardRefEvent {
                column_id: card.column_id,
                card_id: card.id,
            })
            .into_envelope(conn.name()),
        );
        Ok(())
    }

    /// Create a retro with the default columns. The creator and any known
    /// users named in the request become participants. Replies to the
    /// creator only.
    fn create_retro(&self, conn: &mut Conn, req: CreateRetro) -> Result<()> {
        let retro = RetroRow {
            id: new_id(),
            name: req.name,
            stage: String::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let columns: Vec<ColumnRow> = DEFAULT_COLUMNS
            .iter()
            .zip(0..)
            .map(|(name, position)| ColumnRow {
                id: new_id(),
                retro_id: retro.id.clone(),
                name: name.to_string(),
                position,
            })
            .collect();

        let mut participants = vec![conn.name().to_string()];
        for user in req.users {
            if !participants.contains(&user) {
                participants.push(user);
            }
        }

        self.db.create_retro(&retro, &columns, &participants)?;
        let participants = self.db.get_participants(&retro.id)?;

        info!("{} created retro {} ({})", conn.name(), retro.id, retro.name);
        conn.send(retro_event(retro, participants));
        Ok(())
    }

    /// Send the caller every known user and every retro they take part in.
    fn menu(&self, conn: &mut Conn) -> Result<()> {
        let users = self.db.get_users()?;
        let mut retros = Vec::new();
        for retro in self.db.get_retros(conn.name())? {
            let participants = self.db.get_participants(&retro.id)?;
            retros.push(retro_event(retro, participants));
        }

        for user in users {
            conn.send(
                Event::User(UserEvent {
                    username: user.username,
                })
                .into_envelope(""),
            );
        }
        for msg in retros {
            conn.send(msg);
        }
        Ok(())
    }

    fn vote_event(&self, conn: &Conn, card: CardRow) -> Result<VoteEvent> {
        let (user_votes, total_votes) = self.db.vote_counts(conn.name(), &card.id)?;
        Ok(VoteEvent {
            column_id: card.column_id,
            card_id: card.id,
            user_votes,
            total_votes,
        })
    }

    fn card_in_retro(&self, conn: &Conn, card_id: &str) -> Result<CardRow> {
        let retro_id = joined_retro(conn)?;
        self.db
            .get_card(conn.name(), card_id)?
            .filter(|card| card.retro_id == retro_id)
            .ok_or_else(|| anyhow!("no card {} in retro {}", card_id, retro_id))
    }

    fn column_in_retro(&self, conn: &Conn, column_id: &str) -> Result<ColumnRow> {
        let retro_id = joined_retro(conn)?;
        self.db
            .get_column(column_id)?
            .filter(|column| column.retro_id == retro_id)
            .ok_or_else(|| anyhow!("no column {} in retro {}", column_id, retro_id))
    }
}

fn joined_retro(conn: &Conn) -> Result<String> {
    conn.retro()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("not joined to a retro"))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn card_event(card: CardRow) -> Envelope {
    Event::Card(CardEvent {
        column_id: card.column_id,
        card_id: card.id,
        revealed: card.revealed,
        votes: card.votes,
        total_votes: card.total_votes,
    })
    .into_envelope("")
}

/// Content events carry their author as the origin.
fn content_event(column_id: &str, content: ContentRow) -> Envelope {
    Event::Content(ContentEvent {
        column_id: column_id.to_string(),
        card_id: content.card_id,
        content_id: content.id,
        card_text: content.text,
    })
    .into_envelope(&content.author)
}

fn retro_event(retro: RetroRow, participants: Vec<String>) -> Envelope {
    Event::Retro(RetroEvent {
        id: retro.id,
        name: retro.name,
        stage: retro.stage,
        created_at: retro.created_at,
        participants,
    })
    .into_envelope("")
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use crate::testing::{StaticTokens, drain, envelope, ops};
    use crate::{Hub, Mux};

    struct Client {
        user: &'static str,
        conn: Conn,
        rx: mpsc::UnboundedReceiver<Envelope>,
    }

    struct Fixture {
        db: Arc<Database>,
        hub: Hub,
        mux: Mux,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            for user in ["alice", "bob", "carol"] {
                db.ensure_user(user, "secret").unwrap();
            }
            let mux = Mux::new(
                Arc::new(StaticTokens::for_users(&["alice", "bob", "carol", "dave"])),
                Arc::new(Room::new(db.clone())),
            );
            Self {
                db,
                hub: Hub::new(),
                mux,
            }
        }

        fn connect(&self, user: &'static str) -> Client {
            let (tx, rx) = mpsc::unbounded_channel();
            Client {
                user,
                conn: self.hub.register(tx),
                rx,
            }
        }

        fn send(&self, client: &mut Client, op: &str, data: serde_json::Value) {
            let flow = self
                .mux
                .dispatch(&mut client.conn, envelope(client.user, op, &data.to_string()));
            assert!(flow.is_continue());
        }

        /// Create a retro as `client` and return its id.
        fn create(&self, client: &mut Client) -> String {
            self.send(client, "createRetro", serde_json::json!({ "name": "Sprint" }));
            let reply = drain(&mut client.rx);
            assert_eq!(ops(&reply), ["retro"]);
            reply[0].payload::<RetroEvent>().unwrap().id
        }

        /// Join and return the replay as `(column name -> id)` plus messages.
        fn join(
            &self,
            client: &mut Client,
            retro_id: &str,
        ) -> (Vec<(String, String)>, Vec<Envelope>) {
            self.send(client, "joinRetro", serde_json::json!({ "retroId": retro_id }));
            let replay = drain(&mut client.rx);
            let columns = replay
                .iter()
                .filter(|m| m.op == "column")
                .map(|m| {
                    let c: ColumnEvent = m.payload().unwrap();
                    (c.name, c.column_id)
                })
                .collect();
            (columns, replay)
        }
    }

    fn column_id(columns: &[(String, String)], name: &str) -> String {
        columns.iter().find(|(n, _)| n == name).unwrap().1.clone()
    }

    fn card_id_of(msgs: &[Envelope]) -> String {
        msgs.iter()
            .find(|m| m.op == "card")
            .unwrap()
            .payload::<CardEvent>()
            .unwrap()
            .card_id
    }

    #[test]
    fn create_retro_has_default_columns_in_order() {
        let f = Fixture::new();
        let mut alice = f.connect("alice");
        f.send(
            &mut alice,
            "createRetro",
            serde_json::json!({ "name": "Sprint", "users": ["bob", "alice", "nobody"] }),
        );
        let reply = drain(&mut alice.rx);
        assert_eq!(ops(&reply), ["retro"]);
        let retro: RetroEvent = reply[0].payload().unwrap();
        assert_eq!(retro.name, "Sprint");
        assert_eq!(retro.participants, ["alice", "bob"]);

        let (columns, replay) = f.join(&mut alice, &retro.id);
        let names: Vec<_> = columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, DEFAULT_COLUMNS);
        assert_eq!(ops(&replay), ["column"; 5]);
    }

    #[test]
    fn two_clients_see_adds_and_moves_and_third_sees_result() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let mut b = f.connect("bob");
        let mut c = f.connect("carol");
        let retro = f.create(&mut a);
        let (columns, _) = f.join(&mut a, &retro);
        f.join(&mut b, &retro);
        let start = column_id(&columns, "Start");
        let keep = column_id(&columns, "Keep");

        f.send(&mut a, "add", serde_json::json!({ "columnId": start, "cardText": "idea1" }));

        let seen = drain(&mut b.rx);
        assert_eq!(ops(&seen), ["card", "content"]);
        let content: ContentEvent = seen[1].payload().unwrap();
        assert_eq!(content.card_text, "idea1");
        assert_eq!(seen[1].id, "alice");
        let card = card_id_of(&seen);
        assert_eq!(ops(&drain(&mut a.rx)), ["card", "content"]);

        f.send(
            &mut a,
            "move",
            serde_json::json!({ "columnFrom": start, "columnTo": keep, "cardId": card }),
        );
        for client in [&mut a, &mut b] {
            let seen = drain(&mut client.rx);
            assert_eq!(ops(&seen), ["move"]);
            let mv: MoveEvent = seen[0].payload().unwrap();
            assert_eq!((mv.column_from.as_str(), mv.column_to.as_str()), (start.as_str(), keep.as_str()));
        }

        let (_, replay) = f.join(&mut c, &retro);
        let card_msg: CardEvent = replay
            .iter()
            .find(|m| m.op == "card")
            .unwrap()
            .payload()
            .unwrap();
        assert_eq!(card_msg.column_id, keep);
    }

    #[test]
    fn replay_has_a_card_and_content_for_every_add() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let mut b = f.connect("bob");
        let retro = f.create(&mut a);
        let (columns, _) = f.join(&mut a, &retro);
        f.send(&mut a, "stage", serde_json::json!({ "stage": "thinking" }));
        for (column, text) in [("Start", "one"), ("Stop", "two"), ("Start", "three")] {
            let id = column_id(&columns, column);
            f.send(&mut a, "add", serde_json::json!({ "columnId": id, "cardText": text }));
        }

        let (_, replay) = f.join(&mut b, &retro);

        assert_eq!(replay[0].op, "stage");
        let cards: Vec<CardEvent> = replay
            .iter()
            .filter(|m| m.op == "card")
            .map(|m| m.payload().unwrap())
            .collect();
        let contents: Vec<ContentEvent> = replay
            .iter()
            .filter(|m| m.op == "content")
            .map(|m| m.payload().unwrap())
            .collect();
        assert_eq!(cards.len(), 3);
        for card in &cards {
            assert!(contents.iter().any(|c| c.card_id == card.card_id));
        }
        let texts: Vec<_> = contents.iter().map(|c| c.card_text.as_str()).collect();
        assert_eq!(texts, ["one", "three", "two"]);

        // Deterministic: joining again gives the same sequence.
        let (_, again) = f.join(&mut b, &retro);
        assert_eq!(replay, again);
    }

    #[test]
    fn reveal_twice_is_same_as_once() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let retro = f.create(&mut a);
        let (columns, _) = f.join(&mut a, &retro);
        f.send(
            &mut a,
            "add",
            serde_json::json!({ "columnId": column_id(&columns, "More"), "cardText": "x" }),
        );
        let card = card_id_of(&drain(&mut a.rx));

        f.send(&mut a, "reveal", serde_json::json!({ "cardId": card }));
        f.send(&mut a, "reveal", serde_json::json!({ "cardId": card }));
        assert_eq!(ops(&drain(&mut a.rx)), ["reveal", "reveal"]);

        let (_, replay) = f.join(&mut a, &retro);
        let shown: CardEvent = replay
            .iter()
            .find(|m| m.op == "card")
            .unwrap()
            .payload()
            .unwrap();
        assert!(shown.revealed);
    }

    #[test]
    fn vote_then_unvote_restores_count_and_never_goes_negative() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let mut b = f.connect("bob");
        let retro = f.create(&mut a);
        let (columns, _) = f.join(&mut a, &retro);
        f.join(&mut b, &retro);
        f.send(
            &mut a,
            "add",
            serde_json::json!({ "columnId": column_id(&columns, "Keep"), "cardText": "cool" }),
        );
        let card = card_id_of(&drain(&mut a.rx));
        drain(&mut b.rx);

        f.send(&mut b, "vote", serde_json::json!({ "cardId": card }));
        f.send(&mut a, "vote", serde_json::json!({ "cardId": card }));
        let seen = drain(&mut b.rx);
        assert_eq!(ops(&seen), ["vote", "vote"]);
        let last: VoteEvent = seen[1].payload().unwrap();
        assert_eq!(seen[1].id, "alice");
        assert_eq!((last.user_votes, last.total_votes), (1, 2));

        f.send(&mut a, "unvote", serde_json::json!({ "cardId": card }));
        let seen = drain(&mut b.rx);
        assert_eq!(ops(&seen), ["unvote"]);
        let undone: VoteEvent = seen[0].payload().unwrap();
        assert_eq!((undone.user_votes, undone.total_votes), (0, 1));

        // Nothing left to remove: no-op, no broadcast.
        f.send(&mut a, "unvote", serde_json::json!({ "cardId": card }));
        assert!(drain(&mut b.rx).is_empty());
        assert_eq!(f.db.vote_counts("alice", &card).unwrap(), (0, 1));
    }

    #[test]
    fn group_merges_content_and_votes() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let retro = f.create(&mut a);
        let (columns, _) = f.join(&mut a, &retro);
        let start = column_id(&columns, "Start");
        let stop = column_id(&columns, "Stop");
        f.send(&mut a, "add", serde_json::json!({ "columnId": start, "cardText": "from" }));
        let from = card_id_of(&drain(&mut a.rx));
        f.send(&mut a, "add", serde_json::json!({ "columnId": stop, "cardText": "to" }));
        let to = card_id_of(&drain(&mut a.rx));
        f.send(&mut a, "vote", serde_json::json!({ "cardId": from }));
        f.send(&mut a, "vote", serde_json::json!({ "cardId": to }));
        f.send(&mut a, "vote", serde_json::json!({ "cardId": to }));
        drain(&mut a.rx);

        f.send(&mut a, "group", serde_json::json!({ "cardFrom": from, "cardTo": to }));
        let seen = drain(&mut a.rx);
        assert_eq!(ops(&seen), ["group"]);
        let group: GroupEvent = seen[0].payload().unwrap();
        assert_eq!((group.column_from, group.column_to), (start, stop));

        let (_, replay) = f.join(&mut a, &retro);
        let cards: Vec<CardEvent> = replay
            .iter()
            .filter(|m| m.op == "card")
            .map(|m| m.payload().unwrap())
            .collect();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].card_id, to);
        assert_eq!(cards[0].total_votes, 3);
        let on_target = replay
            .iter()
            .filter(|m| m.op == "content")
            .filter(|m| m.payload::<ContentEvent>().unwrap().card_id == to)
            .count();
        assert_eq!(on_target, 2);
    }

    #[test]
    fn group_with_itself_is_ignored() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let retro = f.create(&mut a);
        let (columns, _) = f.join(&mut a, &retro);
        f.send(
            &mut a,
            "add",
            serde_json::json!({ "columnId": column_id(&columns, "Less"), "cardText": "solo" }),
        );
        let card = card_id_of(&drain(&mut a.rx));

        f.send(&mut a, "group", serde_json::json!({ "cardFrom": card, "cardTo": card }));
        assert!(drain(&mut a.rx).is_empty());
        assert!(f.db.get_card("alice", &card).unwrap().is_some());
    }

    #[test]
    fn edit_only_by_author() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let mut b = f.connect("bob");
        let retro = f.create(&mut a);
        let (columns, _) = f.join(&mut a, &retro);
        f.join(&mut b, &retro);
        f.send(
            &mut a,
            "add",
            serde_json::json!({ "columnId": column_id(&columns, "Start"), "cardText": "halp" }),
        );
        let added = drain(&mut a.rx);
        let content: ContentEvent = added[1].payload().unwrap();
        drain(&mut b.rx);

        f.send(
            &mut b,
            "edit",
            serde_json::json!({ "contentId": content.content_id, "cardText": "hijacked" }),
        );
        assert!(drain(&mut a.rx).is_empty());

        f.send(
            &mut a,
            "edit",
            serde_json::json!({ "contentId": content.content_id, "cardText": "halppls" }),
        );
        let seen = drain(&mut b.rx);
        assert_eq!(ops(&seen), ["content"]);
        assert_eq!(seen[0].payload::<ContentEvent>().unwrap().card_text, "halppls");
    }

    #[test]
    fn delete_removes_card_from_replay() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let retro = f.create(&mut a);
        let (columns, _) = f.join(&mut a, &retro);
        f.send(
            &mut a,
            "add",
            serde_json::json!({ "columnId": column_id(&columns, "More"), "cardText": "bye" }),
        );
        let card = card_id_of(&drain(&mut a.rx));
        f.send(&mut a, "vote", serde_json::json!({ "cardId": card }));
        drain(&mut a.rx);

        f.send(&mut a, "delete", serde_json::json!({ "cardId": card }));
        assert_eq!(ops(&drain(&mut a.rx)), ["delete"]);

        let (_, replay) = f.join(&mut a, &retro);
        assert!(replay.iter().all(|m| m.op == "column"));
    }

    #[test]
    fn broadcasts_stay_inside_the_retro() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let mut b = f.connect("bob");
        let first = f.create(&mut a);
        let second = f.create(&mut b);
        f.join(&mut a, &first);
        f.join(&mut b, &second);

        f.send(&mut a, "stage", serde_json::json!({ "stage": "voting" }));

        assert_eq!(ops(&drain(&mut a.rx)), ["stage"]);
        assert!(drain(&mut b.rx).is_empty());
    }

    #[test]
    fn mutations_need_a_joined_retro_and_matching_ids() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let mut b = f.connect("bob");
        let first = f.create(&mut a);
        let second = f.create(&mut b);
        let (columns, _) = f.join(&mut a, &first);
        let start = column_id(&columns, "Start");

        // Not joined yet.
        f.send(&mut b, "add", serde_json::json!({ "columnId": start, "cardText": "nope" }));
        f.send(&mut b, "stage", serde_json::json!({ "stage": "voting" }));
        assert!(drain(&mut b.rx).is_empty());

        // Joined elsewhere: the column isn't part of this retro.
        f.join(&mut b, &second);
        f.send(&mut b, "add", serde_json::json!({ "columnId": start, "cardText": "nope" }));
        assert!(drain(&mut b.rx).is_empty());
        assert!(drain(&mut a.rx).is_empty());

        // Unknown retro.
        f.send(&mut b, "joinRetro", serde_json::json!({ "retroId": "missing" }));
        assert!(drain(&mut b.rx).is_empty());
    }

    #[test]
    fn move_from_wrong_column_is_ignored() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let retro = f.create(&mut a);
        let (columns, _) = f.join(&mut a, &retro);
        let start = column_id(&columns, "Start");
        let keep = column_id(&columns, "Keep");
        f.send(&mut a, "add", serde_json::json!({ "columnId": start, "cardText": "x" }));
        let card = card_id_of(&drain(&mut a.rx));

        f.send(
            &mut a,
            "move",
            serde_json::json!({ "columnFrom": keep, "columnTo": start, "cardId": card }),
        );
        assert!(drain(&mut a.rx).is_empty());
        assert_eq!(f.db.get_card("alice", &card).unwrap().unwrap().column_id, start);
    }

    #[test]
    fn storage_failure_broadcasts_nothing() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let mut b = f.connect("bob");
        let retro = f.create(&mut a);
        f.join(&mut a, &retro);
        f.join(&mut b, &retro);

        f.db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE votes;")?;
            Ok(())
        })
        .unwrap();
        let column = f
            .db
            .get_columns(&retro)
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        f.send(&mut a, "add", serde_json::json!({ "columnId": column.id, "cardText": "x" }));
        let card_id = card_id_of(&drain(&mut a.rx));
        drain(&mut b.rx);

        f.send(&mut a, "vote", serde_json::json!({ "cardId": card_id }));
        assert!(drain(&mut a.rx).is_empty());
        assert!(drain(&mut b.rx).is_empty());
    }

    #[test]
    fn replay_never_lands_after_a_concurrent_delete() {
        for _ in 0..50 {
            let f = Fixture::new();
            let mut a = f.connect("alice");
            let mut b = f.connect("bob");
            let retro = f.create(&mut a);
            let (columns, _) = f.join(&mut a, &retro);
            let start = column_id(&columns, "Start");
            for i in 0..30 {
                f.send(
                    &mut a,
                    "add",
                    serde_json::json!({ "columnId": start, "cardText": format!("card {i}") }),
                );
            }
            let last = drain(&mut a.rx)
                .iter()
                .filter(|m| m.op == "card")
                .map(|m| m.payload::<CardEvent>().unwrap().card_id)
                .last()
                .unwrap();

            std::thread::scope(|s| {
                s.spawn(|| f.send(&mut b, "joinRetro", serde_json::json!({ "retroId": retro })));
                s.spawn(|| f.send(&mut a, "delete", serde_json::json!({ "cardId": last })));
            });

            let seen = drain(&mut b.rx);
            let replayed = seen.iter().position(|m| {
                m.op == "card" && m.payload::<CardEvent>().unwrap().card_id == last
            });
            let deleted = seen.iter().position(|m| m.op == "delete");
            if let Some(replayed) = replayed {
                let deleted = deleted.expect("card replayed but its delete never arrived");
                assert!(replayed < deleted, "delete arrived before the replayed card");
            }
        }
    }

    #[test]
    fn menu_lists_users_then_retros() {
        let f = Fixture::new();
        let mut a = f.connect("alice");
        let mut d = f.connect("dave");
        f.send(&mut a, "createRetro", serde_json::json!({ "name": "One", "users": ["bob"] }));
        f.send(&mut a, "createRetro", serde_json::json!({ "name": "Two" }));
        drain(&mut a.rx);

        f.send(&mut a, "menu", serde_json::json!({}));
        let seen = drain(&mut a.rx);
        assert_eq!(ops(&seen), ["user", "user", "user", "retro", "retro"]);
        let names: Vec<_> = seen[3..]
            .iter()
            .map(|m| m.payload::<RetroEvent>().unwrap().name)
            .collect();
        assert_eq!(names, ["One", "Two"]);

        // No user record for dave, so no retros either.
        f.send(&mut d, "menu", serde_json::json!({}));
        assert_eq!(ops(&drain(&mut d.rx)), ["user", "user", "user"]);
    }
}
