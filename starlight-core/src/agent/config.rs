//! Configuration validation shared by `configInit` and `configEdit`
//! (§4.4). Pulled out of [`super`] so the validation rules -- which are
//! pure and have no dependency on the store or the ledger -- can be unit
//! tested in isolation, matching the source crate's convention of keeping
//! `FromStr`/validation logic separate from the handler that calls it.

use starlight_common::ApiError;

/// Password length ceiling (§8, "Password length > 72 is rejected"). 72 is
/// also `bcrypt`'s classic input limit; kept here even though this crate
/// uses PBKDF2, since it's a reasonable ceiling regardless of KDF and the
/// spec fixes the number explicitly.
pub const MAX_PASSWORD_LEN: usize = 72;

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.trim().is_empty() {
        return Err(ApiError::configuration("username must not be empty"));
    }
    Ok(())
}

/// §8: "Password length > 72 is rejected; empty password is rejected."
pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::configuration("password must not be empty"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::configuration(format!(
            "password must be at most {MAX_PASSWORD_LEN} bytes"
        )));
    }
    Ok(())
}

/// §6, "Environment assumptions": "any configured ledger URL must be
/// validated as such; production-network URLs are rejected."
pub fn validate_horizon_url(url: &str) -> Result<url::Url, ApiError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| ApiError::configuration(format!("invalid horizon URL: {e}")))?;
    if !starlight_common::network::looks_like_testnet_url(&parsed) {
        return Err(ApiError::configuration(
            "configured endpoint does not look like a testnet Horizon instance",
        ));
    }
    Ok(parsed)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_empty_username() {
        assert!(validate_username("").is_err());
        assert!(validate_username("   ").is_err());
    }

    #[test]
    fn rejects_empty_and_overlong_passwords() {
        assert!(validate_password("").is_err());
        assert!(validate_password(&"a".repeat(73)).is_err());
        assert!(validate_password(&"a".repeat(72)).is_ok());
    }

    #[test]
    fn rejects_mainnet_looking_url() {
        assert!(validate_horizon_url("https://horizon.stellar.org").is_err());
    }

    #[test]
    fn accepts_public_testnet_url() {
        assert!(validate_horizon_url("https://horizon-testnet.stellar.org").is_ok());
    }
}
