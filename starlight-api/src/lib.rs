//! The peer-facing and federation-facing HTTP surface (§4.6, §6 "HTTP
//! surface"). Everything in this crate is a thin `warp` adapter over
//! [`starlight_core::agent::AgentCore`]; no channel or wallet logic lives
//! here.

/// Injects shared request state (the agent core) into a filter chain.
mod inject;
/// Converts `Result<T, ApiError>` into the right warp [`Reply`], mapping
/// each [`starlight_common::ErrorKind`] to its HTTP status (§4.6/§7).
mod reply;

/// `POST /starlight/message`.
pub mod message;
/// `GET /federation?type=name&q=name*host`.
pub mod federation;
/// `GET /.well-known/stellar.toml`.
pub mod well_known;
/// Composes the three endpoints into one filter and a `serve` helper.
pub mod routes;

pub use routes::{routes, serve};
