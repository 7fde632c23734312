use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use banter_api::{AppState, AppStateInner, history, rooms};
use banter_gateway::connection;
use banter_gateway::dispatcher::Dispatcher;
use banter_store::{MessageStore, PresenceRegistry, RoomDirectory};

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banter=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("BANTER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("BANTER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Shared state: the three volatile tables and the dispatcher that
    // routes between them.
    let store = MessageStore::new();
    let presence = PresenceRegistry::new();
    let room_dir = RoomDirectory::new();

    let dispatcher = Dispatcher::new(store.clone(), presence.clone(), room_dir.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        store,
        presence,
        rooms: room_dir,
    });

    // Routes
    let rest_routes = Router::new()
        .route("/rooms", get(rooms::list_rooms))
        .route("/rooms", post(rooms::create_room))
        .route("/rooms/{room}/users", get(rooms::room_users))
        .route("/rooms/{room}/messages", get(history::room_history))
        .route("/messages/private", get(history::private_history))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(GatewayState { dispatcher });

    let app = Router::new()
        .merge(rest_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("banter relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher))
}
