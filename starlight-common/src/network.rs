//! Testnet-only environment validation (§6, "Environment assumptions").

/// The Stellar testnet network passphrase. Any configured ledger endpoint
/// and passphrase must match the testnet; production-network configuration
/// is rejected at `configInit`/`configEdit` time.
pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

/// The well-known public Horizon testnet endpoint, used as the CLI default.
pub const DEFAULT_TESTNET_HORIZON_URL: &str = "https://horizon-testnet.stellar.org";

/// The public testnet friendbot, used by `configInit` to fund the freshly
/// derived primary account (§4.4, "triggers a background faucet request").
pub const TESTNET_FRIENDBOT_URL: &str = "https://friendbot.stellar.org";

/// Hostname fragments that identify a Horizon endpoint as testnet-like.
/// Used as a defense-in-depth check alongside the passphrase comparison:
/// an operator who points `horizon_url` at a non-Horizon host but passes the
/// testnet passphrase is still caught, and vice versa.
const TESTNET_HOST_MARKERS: &[&str] = &["testnet", "localhost", "127.0.0.1"];

/// Returns `true` if `passphrase` is the testnet network passphrase.
pub fn is_testnet_passphrase(passphrase: &str) -> bool {
    passphrase == TESTNET_PASSPHRASE
}

/// Validates that a configured Horizon URL plausibly points at a testnet
/// (not production) endpoint. This is a best-effort heuristic over the
/// hostname, same as the abstract contract in §6 demands ("any configured
/// ledger URL must be validated as such"); the passphrase check in
/// [`is_testnet_passphrase`] is the authoritative guard.
pub fn looks_like_testnet_url(url: &url::Url) -> bool {
    match url.host_str() {
        Some(host) => TESTNET_HOST_MARKERS
            .iter()
            .any(|marker| host.contains(marker)),
        None => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_public_testnet_host() {
        let url = url::Url::parse(super::DEFAULT_TESTNET_HORIZON_URL).unwrap();
        assert!(looks_like_testnet_url(&url));
    }

    #[test]
    fn rejects_mainnet_host() {
        let url = url::Url::parse("https://horizon.stellar.org").unwrap();
        assert!(!looks_like_testnet_url(&url));
    }

    #[test]
    fn passphrase_must_match_exactly() {
        assert!(is_testnet_passphrase(TESTNET_PASSPHRASE));
        assert!(!is_testnet_passphrase(
            "Public Global Stellar Network ; September 2015"
        ));
    }
}
