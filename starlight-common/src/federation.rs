use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A federation address: `name*domain`, e.g. `bob*example.com`. Resolves
/// (via the out-of-scope federation lookup protocol) to an account and a
/// starlight peer base URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationAddress {
    pub name: String,
    pub domain: String,
}

impl fmt::Display for FederationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}", self.name, self.domain)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FederationAddressParseError {
    #[error("federation address {0:?} is missing the '*' separator")]
    MissingSeparator(String),
    #[error("federation address {0:?} has an empty name or domain")]
    EmptyComponent(String),
}

impl FromStr for FederationAddress {
    type Err = FederationAddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, domain) = s
            .split_once('*')
            .ok_or_else(|| FederationAddressParseError::MissingSeparator(s.to_string()))?;
        if name.is_empty() || domain.is_empty() {
            return Err(FederationAddressParseError::EmptyComponent(s.to_string()));
        }
        Ok(FederationAddress {
            name: name.to_string(),
            domain: domain.to_string(),
        })
    }
}
