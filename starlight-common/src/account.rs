use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use stellar_strkey::ed25519::PublicKey as StrkeyPublicKey;

/// A Stellar account identity: an ed25519 public key, strkey-encoded as a
/// `G...` address on the wire and in the store.
///
/// This is the type used for every account field in the data model --
/// `hostAcct`, `guestAcct`, `escrowAcct`, `hostRatchetAcct`,
/// `guestRatchetAcct`, `primaryAccount` -- and doubles as the channel's
/// identity (the escrow account's `AccountId`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub fn from_public_key_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strkey = StrkeyPublicKey(self.0);
        write!(f, "{}", strkey.to_string())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({self})")
    }
}

/// Error returned when a strkey fails to parse as a `G...` account address.
#[derive(Debug, thiserror::Error)]
#[error("invalid Stellar account strkey: {0}")]
pub struct AccountIdParseError(String);

impl FromStr for AccountId {
    type Err = AccountIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrkeyPublicKey::from_string(s)
            .map(|pk| AccountId(pk.0))
            .map_err(|_| AccountIdParseError(s.to_string()))
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_roundtrips_through_from_str() {
        let id = AccountId([7u8; 32]);
        let s = id.to_string();
        assert!(s.starts_with('G'));
        let parsed: AccountId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_malformed_strkey() {
        assert!("not-a-strkey".parse::<AccountId>().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let id = AccountId([3u8; 32]);
        let json = serde_json::to_string(&id).unwrap();
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
