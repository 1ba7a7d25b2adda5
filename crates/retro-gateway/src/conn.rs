use thiserror::Error;
use tracing::{trace, warn};
use uuid::Uuid;

use retro_types::events::Envelope;

use crate::hub::{Hub, Outbox};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFirstMessage,
    Authenticated,
    Closed,
}

/// Fatal connection errors. Once one is set the read loop stops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnError {
    #[error("authentication failed for {username:?}")]
    BadAuth { username: String },
}

/// One client connection as seen by handlers.
pub struct Conn {
    id: Uuid,
    name: Option<String>,
    retro: Option<String>,
    state: SessionState,
    err: Option<ConnError>,
    outbox: Outbox,
    hub: Hub,
}

impl Conn {
    pub(crate) fn new(id: Uuid, outbox: Outbox, hub: Hub) -> Self {
        Self {
            id,
            name: None,
            retro: None,
            state: SessionState::AwaitingFirstMessage,
            err: None,
            outbox,
            hub,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Username from the most recent authenticated message, empty before
    /// the first one.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Bind the connection to a verified username. Every message is
    /// authenticated on its own, so this runs per message.
    pub fn bind(&mut self, username: &str) {
        if self.name.as_deref() != Some(username) {
            self.name = Some(username.to_string());
        }
        if self.state == SessionState::AwaitingFirstMessage {
            self.state = SessionState::Authenticated;
        }
    }

    pub fn retro(&self) -> Option<&str> {
        self.retro.as_deref()
    }

    /// Scope this connection's broadcasts to a retro.
    pub fn join(&mut self, retro_id: &str) {
        self.retro = Some(retro_id.to_string());
        self.hub.set_retro(self.id, retro_id);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn err(&self) -> Option<&ConnError> {
        self.err.as_ref()
    }

    /// Record a fatal error. The mux stops reading after the current message.
    pub fn fail(&mut self, err: ConnError) {
        self.err = Some(err);
        self.state = SessionState::Closed;
    }

    /// Send to this connection only.
    pub fn send(&self, msg: Envelope) {
        if self.outbox.send(msg).is_err() {
            trace!("Connection {} already closed", self.id);
        }
    }

    /// Send to every connection in the same retro, this one included. A
    /// connection that has not joined a retro has no one to broadcast to.
    pub fn broadcast(&self, msg: Envelope) {
        match self.retro.as_deref() {
            Some(retro) => self.hub.broadcast(Some(retro), &msg),
            None => warn!(
                "Connection {} broadcast {} before joining a retro, dropped",
                self.id, msg.op
            ),
        }
    }
}
