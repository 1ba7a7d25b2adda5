use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use retro_types::events::{BAD_AUTH, Envelope, Event};
use retro_types::ops::Operation;

use crate::conn::{Conn, ConnError, SessionState};

/// Verifies the `(username, token)` pair carried by every client message.
pub trait Authenticator: Send + Sync {
    fn verify(&self, username: &str, token: &str) -> bool;
}

/// Executes decoded operations on behalf of a connection.
pub trait Handler: Send + Sync {
    fn handle(&self, conn: &mut Conn, op: Operation);
}

/// Authenticates and routes incoming envelopes.
#[derive(Clone)]
pub struct Mux {
    auth: Arc<dyn Authenticator>,
    handler: Arc<dyn Handler>,
}

impl Mux {
    pub fn new(auth: Arc<dyn Authenticator>, handler: Arc<dyn Handler>) -> Self {
        Self { auth, handler }
    }

    /// Process one envelope. `Break` means the connection must be closed.
    ///
    /// A failed authentication gets a single `error` reply and closes the
    /// connection. Unknown ops and malformed payloads are logged and skipped
    /// so that an out-of-date client keeps its session.
    pub fn dispatch(&self, conn: &mut Conn, env: Envelope) -> ControlFlow<()> {
        if conn.state() == SessionState::Closed {
            return ControlFlow::Break(());
        }

        let Some(username) = self.authenticate(&env) else {
            let username = env.auth.map(|a| a.username).unwrap_or(env.id);
            warn!(
                "Connection {} failed auth as {:?} on {}",
                conn.id(),
                username,
                env.op
            );
            conn.send(Event::Error(BAD_AUTH.to_string()).into_envelope(""));
            conn.fail(ConnError::BadAuth { username });
            return ControlFlow::Break(());
        };

        conn.bind(&username);

        match Operation::decode(&env.op, &env.data) {
            Ok(Some(op)) => {
                trace!("{} -> {}", username, op.name());
                self.handler.handle(conn, op);
            }
            Ok(None) => debug!("{} sent unknown op {:?}, ignoring", username, env.op),
            Err(e) => warn!(
                "{} sent bad {} payload: {} -- raw: {}",
                username,
                env.op,
                e,
                env.data.chars().take(200).collect::<String>()
            ),
        }

        if conn.err().is_some() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// The verified username, if the envelope's proof holds. An envelope
    /// claiming an origin other than the authenticated user is rejected.
    fn authenticate(&self, env: &Envelope) -> Option<String> {
        let auth = env.auth.as_ref()?;
        if !env.id.is_empty() && env.id != auth.username {
            return None;
        }
        self.auth
            .verify(&auth.username, &auth.token)
            .then(|| auth.username.clone())
    }
}
