//! Federation-address resolution (§1, "Out of scope: federation-address
//! lookup"): the agent core only depends on this through the
//! [`FederationResolver`] trait, per the spec's "referenced only by their
//! interface" framing. [`HttpFederationResolver`] is a minimal, best-effort
//! implementation of the two-hop Stellar federation protocol (fetch
//! `stellar.toml`, then query the federation server it names) so
//! `doCreateChannel` has something real to drive; a production deployment
//! is free to swap in a fuller implementation (caching, SEP-2 compliance
//! edge cases) behind the same trait.

use async_trait::async_trait;
use starlight_common::{AccountId, ApiError, FederationAddress};

/// The result of resolving a federation address (§4.4, `doCreateChannel`
/// step 1): the counterparty's on-ledger account and the base URL of their
/// starlight peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederationRecord {
    pub account: AccountId,
    pub starlight_url: String,
}

#[async_trait]
pub trait FederationResolver: Send + Sync {
    async fn resolve(&self, address: &FederationAddress) -> Result<FederationRecord, ApiError>;
}

/// Fetches `https://{domain}/.well-known/stellar.toml`, extracts
/// `FEDERATION_SERVER` and `STARLIGHT_SERVER`, then queries the federation
/// server for `type=name&q=name*domain`.
pub struct HttpFederationResolver {
    http: reqwest::Client,
}

impl HttpFederationResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(serde::Deserialize)]
struct FederationLookupResponse {
    account_id: String,
}

/// Pulls `KEY = "value"` lines out of a `stellar.toml`-shaped document.
/// Out of scope is full TOML parsing (§1); the descriptor this agent both
/// serves (§4.6a) and consumes here only ever has flat string assignments.
fn extract_toml_string(body: &str, key: &str) -> Option<String> {
    body.lines().find_map(|line| {
        let line = line.trim();
        let rest = line.strip_prefix(key)?.trim_start();
        let rest = rest.strip_prefix('=')?.trim();
        let rest = rest.strip_prefix('"')?;
        let (value, _) = rest.split_once('"')?;
        Some(value.to_string())
    })
}

#[async_trait]
impl FederationResolver for HttpFederationResolver {
    async fn resolve(&self, address: &FederationAddress) -> Result<FederationRecord, ApiError> {
        let toml_url = format!("https://{}/.well-known/stellar.toml", address.domain);
        let body = self
            .http
            .get(&toml_url)
            .send()
            .await
            .map_err(|e| ApiError::transient(format!("failed to fetch {toml_url}: {e}")))?
            .text()
            .await
            .map_err(|e| ApiError::transient(format!("failed to read {toml_url}: {e}")))?;

        let federation_server = extract_toml_string(&body, "FEDERATION_SERVER")
            .ok_or_else(|| ApiError::domain(format!("{toml_url} has no FEDERATION_SERVER entry")))?;
        let starlight_server = extract_toml_string(&body, "STARLIGHT_SERVER")
            .ok_or_else(|| ApiError::domain(format!("{toml_url} has no STARLIGHT_SERVER entry")))?;

        let lookup: FederationLookupResponse = self
            .http
            .get(&federation_server)
            .query(&[("type", "name"), ("q", &address.to_string())])
            .send()
            .await
            .map_err(|e| ApiError::transient(format!("federation lookup failed: {e}")))?
            .json()
            .await
            .map_err(|e| ApiError::domain(format!("malformed federation response: {e}")))?;

        let account = lookup
            .account_id
            .parse()
            .map_err(|_| ApiError::domain("federation response's account_id is not a valid strkey"))?;

        Ok(FederationRecord {
            account,
            starlight_url: starlight_server,
        })
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_flat_toml_string_fields() {
        let body = "FEDERATION_SERVER = \"https://example.com/federation\"\nSTARLIGHT_SERVER = \"https://example.com/starlight\"\n";
        assert_eq!(
            extract_toml_string(body, "FEDERATION_SERVER"),
            Some("https://example.com/federation".to_string())
        );
        assert_eq!(
            extract_toml_string(body, "STARLIGHT_SERVER"),
            Some("https://example.com/starlight".to_string())
        );
    }

    #[test]
    fn missing_field_returns_none() {
        assert_eq!(extract_toml_string("FOO = \"bar\"", "FEDERATION_SERVER"), None);
    }

    #[tokio::test]
    async fn mock_resolver_round_trips() {
        let resolver = mock::MockFederationResolver::new();
        let addr: FederationAddress = "bob*example.com".parse().unwrap();
        resolver.insert(
            addr.clone(),
            FederationRecord {
                account: AccountId([3u8; 32]),
                starlight_url: "https://example.com/starlight".into(),
            },
        );
        let resolved = resolver.resolve(&addr).await.unwrap();
        assert_eq!(resolved.account, AccountId([3u8; 32]));
    }
}
