use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Redirect};
use tracing::{info, warn};

use retro_db::Database;
use retro_types::api::{ERROR_COULD_NOT_CREATE_USER, ERROR_NOT_IN_ORG};

use crate::auth::Identity;

/// Username the test identity provider signs everyone in as.
pub const TEST_USER: &str = "test@example.com";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub identity: Identity,
}

/// Final step of every login flow: hand the browser a token, or an error code.
pub fn auth_callback(identity: &Identity, allowed: bool, username: &str) -> Redirect {
    if !allowed {
        info!("Login refused for {}", username);
        return Redirect::to(&format!("/?error={ERROR_NOT_IN_ORG}"));
    }

    match identity.add_user(username) {
        Ok(token) => Redirect::to(&format!("/?token={token}")),
        Err(e) => {
            warn!("Could not sign in {}: {}", username, e);
            Redirect::to(&format!("/?error={ERROR_COULD_NOT_CREATE_USER}"))
        }
    }
}

/// `GET /oauth/test`
pub async fn test_login() -> Redirect {
    Redirect::to("/oauth/test/callback")
}

/// `GET /oauth/test/callback`
pub async fn test_callback(State(state): State<AppState>) -> Redirect {
    auth_callback(&state.identity, true, TEST_USER)
}

/// `GET /reset`: wipe every board and user, then go home.
pub async fn reset(State(state): State<AppState>) -> Result<Redirect, StatusCode> {
    state.db.reset().map_err(|e| {
        warn!("Reset failed: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    info!("Database reset");
    Ok(Redirect::to("/"))
}
