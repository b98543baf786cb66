//! Builds the browser-session HTTP client from a credential blob: an
//! opaque JSON object understood only by this module.

use std::time::Duration;

use serde_json::Value;
use wreq::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use wreq::Client;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to build http client: {0}")]
    Build(#[from] wreq::Error),
}

pub struct CredentialSession {
    pub client: Client,
    pub account_name: Option<String>,
}

/// The core only reads `accountName`; everything else in the blob is
/// forwarded to the HTTP client as session material (cookie jar, UA) and
/// otherwise left opaque.
pub fn build(credential: &Value) -> Result<CredentialSession, SessionError> {
    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(IDLE_TIMEOUT)
        .cookie_store(true);

    let mut headers = HeaderMap::new();
    if let Some(cookie) = credential.get("cookie").and_then(Value::as_str) {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            headers.insert(COOKIE, value);
        }
    }
    if let Some(user_agent) = credential.get("userAgent").and_then(Value::as_str) {
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }
    }
    if !headers.is_empty() {
        builder = builder.default_headers(headers);
    }

    let client = builder.build()?;
    let account_name = credential
        .get("accountName")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(CredentialSession { client, account_name })
}
