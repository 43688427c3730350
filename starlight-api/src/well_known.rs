//! `GET /.well-known/stellar.toml` (§4.4, §6): a static descriptor
//! interpolating the request's `Host` header into `FEDERATION_SERVER` and
//! `STARLIGHT_SERVER`, matching the flat-string-assignment shape this
//! agent's own federation client parses in
//! `starlight_core::agent::federation::extract_toml_string`.

pub fn render(host: &str) -> String {
    format!(
        "FEDERATION_SERVER = \"https://{host}/federation\"\n\
         STARLIGHT_SERVER = \"https://{host}/starlight/message\"\n"
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interpolates_request_host() {
        let toml = render("alice.example");
        assert!(toml.contains("FEDERATION_SERVER = \"https://alice.example/federation\""));
        assert!(toml.contains("STARLIGHT_SERVER = \"https://alice.example/starlight/message\""));
    }
}
