//! Identity and login endpoints: per-user signing secrets, session tokens
//! and the redirect flow that hands a token to the browser.

pub mod auth;
pub mod login;

pub use auth::{AuthError, Identity};
pub use login::{AppState, AppStateInner};
