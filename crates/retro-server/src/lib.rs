//! HTTP surface of the retro board: the WebSocket endpoint, the test login
//! flow and the static front end.

pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use retro_api::auth::Identity;
use retro_api::login::{self, AppState, AppStateInner};
use retro_db::Database;
use retro_gateway::connection;
use retro_gateway::{Hub, Mux, Room};

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    hub: Hub,
    mux: Mux,
}

/// Build the router. Every WebSocket shares one hub and one room backed by `db`.
pub fn app(db: Arc<Database>, config: &Config) -> Router {
    let identity = Identity::new(db.clone(), config.audience.clone());
    let mux = Mux::new(Arc::new(identity.clone()), Arc::new(Room::new(db.clone())));
    let state = ServerState {
        hub: Hub::new(),
        mux,
    };

    let mut app = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state);

    if config.test_mode {
        info!("Test mode: /oauth/test and /reset are enabled");
        let app_state: AppState = Arc::new(AppStateInner { db, identity });
        let test_routes = Router::new()
            .route("/oauth/test", get(login::test_login))
            .route("/oauth/test/callback", get(login::test_callback))
            .route("/reset", get(login::reset))
            .with_state(app_state);
        app = app.merge(test_routes);
    }

    app.fallback_service(ServeDir::new(&config.assets))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.hub, state.mux))
}
