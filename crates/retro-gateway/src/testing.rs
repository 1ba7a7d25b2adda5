use std::collections::HashMap;

use tokio::sync::mpsc;

use retro_types::events::{Envelope, EnvelopeAuth};

use crate::mux::Authenticator;

/// Accepts `(username, "<username>-token")` for the listed users.
pub struct StaticTokens(pub HashMap<String, String>);

impl StaticTokens {
    pub fn for_users(users: &[&str]) -> Self {
        Self(
            users
                .iter()
                .map(|u| (u.to_string(), format!("{u}-token")))
                .collect(),
        )
    }
}

impl Authenticator for StaticTokens {
    fn verify(&self, username: &str, token: &str) -> bool {
        self.0.get(username).is_some_and(|t| t == token)
    }
}

/// Everything queued for a connection so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// A client message from `user` carrying a valid token.
pub fn envelope(user: &str, op: &str, data: &str) -> Envelope {
    Envelope {
        id: user.to_string(),
        auth: Some(EnvelopeAuth {
            username: user.to_string(),
            token: format!("{user}-token"),
        }),
        op: op.to_string(),
        data: data.to_string(),
    }
}

pub fn ops(msgs: &[Envelope]) -> Vec<&str> {
    msgs.iter().map(|m| m.op.as_str()).collect()
}
