//! `GET /federation?type=name&q=<name>*<host>` (§4.4, §6): resolves a
//! federation address whose `name` matches this agent's configured
//! username to `{stellar_address, account_id}`. Any other `type` or a
//! non-matching `name` is a domain error (400) -- the out-of-scope SEP-2
//! federation protocol defines other lookup types this agent never serves.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use starlight_common::{ApiError, FederationAddress};
use starlight_core::agent::AgentCore;
use warp::reply::Response;

use crate::reply;

#[derive(Deserialize)]
pub struct FederationQuery {
    #[serde(rename = "type")]
    pub kind: String,
    pub q: String,
}

#[derive(Serialize)]
struct FederationResponse {
    stellar_address: String,
    account_id: String,
}

async fn resolve(query: FederationQuery, agent: Arc<AgentCore>) -> Result<FederationResponse, ApiError> {
    if query.kind != "name" {
        return Err(ApiError::domain(format!(
            "unsupported federation lookup type {:?}",
            query.kind
        )));
    }
    let address: FederationAddress = query
        .q
        .parse()
        .map_err(|e| ApiError::domain(format!("malformed federation address: {e}")))?;

    let config = agent.config()?;
    if address.name != config.username {
        return Err(ApiError::domain("no such federation name on this agent"));
    }
    let primary = agent.primary_account()?;

    Ok(FederationResponse {
        stellar_address: address.to_string(),
        account_id: primary.to_string(),
    })
}

pub async fn handle(query: FederationQuery, agent: Arc<AgentCore>) -> Response {
    reply::json_result(resolve(query, agent).await)
}

#[cfg(test)]
mod test {
    use starlight_core::{
        agent::{federation::mock::MockFederationResolver, ConfigInitRequest},
        ledger::MockLedgerClient,
        store::DurableStore,
        support::ShutdownChannel,
    };

    use super::*;

    async fn configured_agent(username: &str) -> Arc<AgentCore> {
        let agent = Arc::new(AgentCore::new(
            Arc::new(DurableStore::open_temporary().unwrap()),
            Arc::new(MockLedgerClient::new()),
            Arc::new(MockFederationResolver::new()),
            reqwest::Client::new(),
            ShutdownChannel::new(),
        ));
        agent
            .config_init(ConfigInitRequest {
                username: username.to_string(),
                password: "correct horse battery staple".to_string(),
                horizon_url: starlight_common::network::DEFAULT_TESTNET_HORIZON_URL.to_string(),
                network_passphrase: starlight_common::network::TESTNET_PASSPHRASE.to_string(),
            })
            .await
            .unwrap();
        agent
    }

    #[tokio::test]
    async fn resolves_own_username() {
        let agent = configured_agent("alice").await;
        let resolved = resolve(
            FederationQuery {
                kind: "name".to_string(),
                q: "alice*example.com".to_string(),
            },
            agent.clone(),
        )
        .await
        .unwrap();
        assert_eq!(resolved.account_id, agent.primary_account().unwrap().to_string());
    }

    #[tokio::test]
    async fn rejects_other_usernames() {
        let agent = configured_agent("alice").await;
        let err = resolve(
            FederationQuery {
                kind: "name".to_string(),
                q: "bob*example.com".to_string(),
            },
            agent,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, starlight_common::ErrorKind::Domain);
    }

    #[tokio::test]
    async fn rejects_non_name_lookup_types() {
        let agent = configured_agent("alice").await;
        let err = resolve(
            FederationQuery {
                kind: "id".to_string(),
                q: "alice*example.com".to_string(),
            },
            agent,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, starlight_common::ErrorKind::Domain);
    }
}
