//! `POST /starlight/message` (§4.6): decodes the peer envelope and
//! dispatches it into the agent core. Malformed bodies are rejected by the
//! `warp::body::json` filter itself (400, handled by [`routes::recover`]);
//! everything past that point maps through [`reply::empty_result`].

use std::sync::Arc;

use starlight_core::{agent::AgentCore, channel::PeerEnvelope};
use warp::reply::Response;

use crate::reply;

pub async fn handle(envelope: PeerEnvelope, agent: Arc<AgentCore>) -> Response {
    let result = agent.handle_peer_envelope(envelope).await;
    reply::empty_result(result)
}
