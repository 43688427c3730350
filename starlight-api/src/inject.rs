//! Warp filters that inject items required by subsequent handlers.
//! Grounded on the source workspace's command-server `inject` module: one
//! `warp::any().map(move || ...)` filter per shared dependency.

use std::{convert::Infallible, sync::Arc};

use starlight_core::agent::AgentCore;
use warp::Filter;

/// Injects the agent core shared by every handler in this crate.
pub fn agent(
    agent: Arc<AgentCore>,
) -> impl Filter<Extract = (Arc<AgentCore>,), Error = Infallible> + Clone {
    warp::any().map(move || agent.clone())
}
