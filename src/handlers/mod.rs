//! Request handlers for different server endpoints

pub mod auth;
pub mod websocket;

use log::warn;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::constants::WS_PATH;
use crate::core::router::EventRouter;
use crate::core::server::RelayServer;

// Re-export the handshake filter and the websocket handler
pub use auth::{with_handshake, Handshake, Unauthorized};
pub use websocket::handle_ws_client;

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    error: String,
}

fn with_router(
    router: Arc<EventRouter>,
) -> impl Filter<Extract = (Arc<EventRouter>,), Error = Infallible> + Clone {
    warp::any().map(move || router.clone())
}

/// `GET /ws` (authenticated upgrade) and `GET /health` (storage check)
pub fn routes(server: &RelayServer) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let max_frame_size = server.config().max_frame_size;
    let ws_route = warp::path(WS_PATH)
        .and(warp::path::end())
        .and(with_handshake(server.token_manager()))
        .and(warp::ws())
        .and(with_router(server.router()))
        .map(move |handshake: Handshake, ws: warp::ws::Ws, router: Arc<EventRouter>| {
            let Handshake {
                identity,
                subprotocol,
            } = handshake;
            let upgrade = ws
                .max_message_size(max_frame_size)
                .on_upgrade(move |socket| handle_ws_client(socket, identity, router));

            match subprotocol {
                Some(protocol) => {
                    warp::reply::with_header(upgrade, "sec-websocket-protocol", protocol)
                        .into_response()
                }
                None => upgrade.into_response(),
            }
        });

    let storage = server.storage();
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and_then(move || {
            let storage = storage.clone();
            async move {
                let reply = if RelayServer::storage_healthy(storage.as_ref()).await {
                    warp::reply::with_status("OK", StatusCode::OK)
                } else {
                    warp::reply::with_status("UNAVAILABLE", StatusCode::SERVICE_UNAVAILABLE)
                };
                Ok::<_, Rejection>(reply)
            }
        });

    ws_route.or(health_route)
}

/// Turn rejections into JSON error replies
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let status = if err.find::<Unauthorized>().is_some() {
        StatusCode::UNAUTHORIZED
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        warn!("Unhandled rejection: {:?}", err);
        StatusCode::BAD_REQUEST
    };

    let body = ErrorBody {
        code: status.as_u16(),
        error: status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
