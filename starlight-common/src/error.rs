//! The crate-wide error kind and [`ApiError`] type (§7, "Error Handling
//! Design"), grounded on the source workspace's `error_kind!` macro pattern
//! but collapsed down to the single service this agent exposes, rather than
//! one generated enum per backend service.

use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Declare an error-kind enum plus its `Display`/`ErrorCode` plumbing.
///
/// Unlike the source macro, this version doesn't need an `Unknown(code)`
/// catch-all -- there is only one peer-facing service here and both sides of
/// the wire run the same code, so there's no cross-version skew to handle.
macro_rules! error_kind {
    (
        $(#[$enum_meta:meta])*
        pub enum $name:ident {
            $(
                #[doc = $msg:literal]
                $variant:ident = $code:literal,
            )*
        }
    ) => {
        $(#[$enum_meta])*
        pub enum $name {
            $(
                #[doc = $msg]
                $variant,
            )*
        }

        impl $name {
            /// Returns the human-readable message for this error kind.
            pub fn to_msg(self) -> &'static str {
                match self {
                    $( Self::$variant => $msg, )*
                }
            }

            /// Returns the stable wire code for this error kind.
            pub fn to_code(self) -> u16 {
                match self {
                    $( Self::$variant => $code, )*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", (*self).to_msg())
            }
        }
    };
}

error_kind! {
    /// The error-kind taxonomy from §7: each kind has its own propagation
    /// rule (return to caller untouched, abort the durable transaction,
    /// retry with backoff, or trigger process shutdown).
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
    pub enum ErrorKind {
        /// invalid configuration (username, password, endpoint, forbidden edit)
        Configuration = 1,
        /// invalid domain operation (insufficient balance, bad amount/address, duplicate channel)
        Domain = 2,
        /// a signature-producing transition ran without the seed in memory
        Precondition = 3,
        /// a non-retriable protocol violation (duplicate channel, conflicting state)
        ProtocolNonRetriable = 4,
        /// a transient failure (network/ledger timeout, faucet failure)
        Transient = 5,
        /// an unrecoverable failure that should abort the process
        Fatal = 6,
    }
}

/// Maps an [`ErrorKind`] to the HTTP status code returned to a peer, per the
/// table in §7 and the `POST /starlight/message` semantics in §4.6.
pub trait ToHttpStatus {
    fn to_http_status(&self) -> StatusCode;
}

impl ToHttpStatus for ErrorKind {
    fn to_http_status(&self) -> StatusCode {
        match self {
            ErrorKind::Configuration | ErrorKind::Domain => StatusCode::BAD_REQUEST,
            // Precondition errors are retriable: the peer should resend.
            ErrorKind::Precondition => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ProtocolNonRetriable => StatusCode::RESET_CONTENT,
            ErrorKind::Transient => StatusCode::INTERNAL_SERVER_ERROR,
            // Fatal errors never reach HTTP; they trigger shutdown instead.
            ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The one error type returned by every fallible operation that crosses a
/// component boundary in this agent: dispatcher entry points, the FSM, the
/// peer RPC surface.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {msg}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub msg: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, msg)
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Domain, msg)
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, msg)
    }

    pub fn protocol_non_retriable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolNonRetriable, msg)
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, msg)
    }
}

impl ToHttpStatus for ApiError {
    fn to_http_status(&self) -> StatusCode {
        self.kind.to_http_status()
    }
}
