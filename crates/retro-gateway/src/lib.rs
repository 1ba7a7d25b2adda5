//! Real-time session layer: connection registry, per-message authenticated
//! dispatch and the retro board handlers.

pub mod conn;
pub mod connection;
pub mod hub;
pub mod mux;
pub mod room;

#[cfg(test)]
mod testing;

pub use conn::{Conn, ConnError, SessionState};
pub use hub::Hub;
pub use mux::{Authenticator, Handler, Mux};
pub use room::Room;
