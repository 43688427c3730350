//! Composes the three peer/federation endpoints into one filter (§4.6a:
//! "a `routes()` constructor composing the three endpoints, JSON body
//! rejection -> 400, a tracing span per request"), plus a `serve` helper
//! for the binary.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use serde::Serialize;
use starlight_core::agent::AgentCore;
use warp::{http::StatusCode, Filter, Rejection, Reply};

use crate::{federation, inject, message, well_known};

/// `POST /starlight/message`.
fn message_route(
    agent: Arc<AgentCore>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = Rejection> + Clone {
    warp::path!("starlight" / "message")
        .and(warp::post())
        .and(warp::body::content_length_limit(64 * 1024))
        .and(warp::body::json())
        .and(inject::agent(agent))
        .then(message::handle)
}

/// `GET /federation?type=name&q=<name>*<host>`.
fn federation_route(
    agent: Arc<AgentCore>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = Rejection> + Clone {
    warp::path!("federation")
        .and(warp::get())
        .and(warp::query::<federation::FederationQuery>())
        .and(inject::agent(agent))
        .then(federation::handle)
}

/// `GET /.well-known/stellar.toml`.
fn well_known_route(
) -> impl Filter<Extract = (warp::reply::Response,), Error = Rejection> + Clone {
    warp::path!(".well-known" / "stellar.toml")
        .and(warp::get())
        .and(warp::header::<String>("host"))
        .map(|host: String| warp::reply::with_status(well_known::render(&host), StatusCode::OK).into_response())
}

/// The full peer RPC surface (§4.6), with malformed-body and unmatched-path
/// rejections translated into plain HTTP responses rather than warp's
/// default debug output.
pub fn routes(
    agent: Arc<AgentCore>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let routes = message_route(agent.clone())
        .or(federation_route(agent))
        .or(well_known_route())
        .with(warp::trace::request());
    routes.recover(recover)
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    msg: String,
}

/// §4.6: malformed request bodies are 400s, not 500s; anything else warp
/// couldn't route is a plain 404.
async fn recover(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, msg) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "no such route".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("malformed request body: {e}"))
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "unhandled rejection".to_string())
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { code: 0, msg }),
        status,
    ))
}

/// Serves the peer RPC surface until the returned future is dropped (the
/// binary races this against the shutdown signal).
pub async fn serve(agent: Arc<AgentCore>, addr: SocketAddr) {
    warp::serve(routes(agent)).run(addr).await;
}
