//! Shared wire types and primitives used by both the agent core and the
//! peer/federation HTTP surface.
//!
//! Nothing in this crate talks to the ledger, the store, or the network; it
//! only defines the vocabulary ([`AccountId`], [`Stroops`], [`ChannelId`],
//! [`FederationAddress`]) and the error taxonomy ([`ApiError`]) that the rest
//! of the workspace builds on.

/// Stellar account identities (strkey-encoded ed25519 public keys).
pub mod account;
/// Native-asset amounts, denominated in stroops.
pub mod amount;
/// The crate-wide error kind and [`ApiError`] type.
pub mod error;
/// Federation address (`name*domain`) parsing.
pub mod federation;
/// Network passphrase validation (testnet-only).
pub mod network;
/// Channel round numbers.
pub mod round;

pub use account::AccountId;
pub use amount::Stroops;
pub use error::{ApiError, ErrorKind, ToHttpStatus};
pub use federation::FederationAddress;
pub use round::RoundNumber;

/// The channel's identity is the public key of its escrow account.
pub type ChannelId = AccountId;
