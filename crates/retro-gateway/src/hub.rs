use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use retro_types::events::Envelope;

use crate::conn::Conn;

/// Sending half of a connection's outgoing queue. Sends never block; the
/// connection's writer task drains the queue onto the socket.
pub type Outbox = mpsc::UnboundedSender<Envelope>;

struct Member {
    outbox: Outbox,
    /// Retro the connection joined, if any. Scopes broadcasts.
    retro: Option<String>,
}

/// Registry of open connections. Cheap to clone; clones share membership.
#[derive(Clone, Default)]
pub struct Hub {
    members: Arc<RwLock<HashMap<Uuid, Member>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection whose outgoing messages go to `outbox`.
    pub fn register(&self, outbox: Outbox) -> Conn {
        let id = Uuid::new_v4();
        self.write().insert(
            id,
            Member {
                outbox: outbox.clone(),
                retro: None,
            },
        );
        Conn::new(id, outbox, self.clone())
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister(&self, id: Uuid) {
        self.write().remove(&id);
    }

    pub(crate) fn set_retro(&self, id: Uuid, retro_id: &str) {
        if let Some(member) = self.write().get_mut(&id) {
            member.retro = Some(retro_id.to_string());
        }
    }

    /// Send `msg` to every connection in `retro`, or to every connection at
    /// all when `retro` is `None`.
    ///
    /// Membership is snapshotted before sending, so registration is never
    /// blocked on delivery. A closed recipient is skipped.
    pub fn broadcast(&self, retro: Option<&str>, msg: &Envelope) {
        let recipients: Vec<(Uuid, Outbox)> = self
            .read()
            .iter()
            .filter(|(_, m)| retro.is_none() || m.retro.as_deref() == retro)
            .map(|(id, m)| (*id, m.outbox.clone()))
            .collect();

        for (id, outbox) in recipients {
            if outbox.send(msg.clone()).is_err() {
                debug!("Skipping closed connection {} for {}", id, msg.op);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Member>> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Member>> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }
}
