// Authentication: exchanges a username and password for a bearer token.
// Failures never raise; a missing token is the only failure signal and the
// caller decides whether that ends the run.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Source of bearer tokens. Asked once at startup and again whenever the
/// service reports that the current token has expired.
pub trait Authenticator {
    fn request_token(&self) -> Option<String>;
}

/// Login request payload.
#[derive(Serialize, Debug)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Expected response from the token endpoint.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    token: Option<String>,
}

/// OAuth token client. Keeps the credentials so a fresh token can be issued
/// mid-run without prompting again.
pub struct AuthClient {
    client: Client,
    oauth_url: String,
    username: String,
    password: String,
}

impl AuthClient {
    pub fn new(oauth_url: &str, username: &str, password: &str) -> reqwest::Result<Self> {
        let client = Client::builder().build()?;
        Ok(AuthClient {
            client,
            oauth_url: oauth_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    fn fetch_token(&self) -> reqwest::Result<Option<String>> {
        let req = TokenRequest {
            username: &self.username,
            password: &self.password,
        };
        let res = self.client.post(&self.oauth_url).json(&req).send()?.error_for_status()?;
        let body: TokenResponse = res.json()?;
        Ok(body.token)
    }
}

impl Authenticator for AuthClient {
    fn request_token(&self) -> Option<String> {
        debug!(url = %self.oauth_url, user = %self.username, "requesting token");
        match self.fetch_token() {
            Ok(Some(token)) if !token.is_empty() => Some(token),
            Ok(_) => {
                warn!("token endpoint answered without a token");
                None
            }
            Err(e) => {
                warn!(error = %e, "token request failed");
                None
            }
        }
    }
}
