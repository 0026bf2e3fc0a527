//! OAuth identity provider: authorization URL and redirect handling
//!
//! The provider redirects back with the identity token in the URL fragment
//! (`#id_token=...`). Only header and payload are decoded; the signature is
//! checked by the chain when the transaction executes.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use crate::error::{Result, WalletError};

pub const ID_TOKEN_PARAM: &str = "id_token";

/// Parameters of the authorization redirect
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    pub endpoint: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub response_type: &'a str,
    pub scope: &'a str,
    pub nonce: &'a str,
}

impl<'a> AuthRequest<'a> {
    pub fn new(endpoint: &'a str, client_id: &'a str, redirect_uri: &'a str, nonce: &'a str) -> Self {
        Self {
            endpoint,
            client_id,
            redirect_uri,
            response_type: "id_token",
            scope: "openid",
            nonce,
        }
    }

    pub fn scope(mut self, scope: &'a str) -> Self {
        self.scope = scope;
        self
    }
}

pub fn authorization_url(request: &AuthRequest<'_>) -> Result<Url> {
    Url::parse_with_params(
        request.endpoint,
        &[
            ("client_id", request.client_id),
            ("redirect_uri", request.redirect_uri),
            ("response_type", request.response_type),
            ("scope", request.scope),
            ("nonce", request.nonce),
        ],
    )
    .map_err(|e| WalletError::InvalidToken(format!("bad authorization endpoint: {}", e)))
}

/// `aud` may be a single string or an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn primary(&self) -> Option<&str> {
        match self {
            Audience::One(aud) => Some(aud),
            Audience::Many(list) => list.first().map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl IdentityClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }
}

/// Raw token plus its decoded parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityToken {
    pub raw: String,
    pub header: TokenHeader,
    pub claims: IdentityClaims,
}

impl IdentityToken {
    pub fn decode(raw: &str) -> Result<Self> {
        let mut parts = raw.trim().split('.');
        let (header, payload) = match (parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(payload), Some(_signature)) => (header, payload),
            _ => return Err(WalletError::InvalidToken("expected three dot-separated parts".into())),
        };
        Ok(Self {
            raw: raw.trim().to_string(),
            header: decode_part(header, "header")?,
            claims: decode_part(payload, "payload")?,
        })
    }
}

fn decode_part<T: DeserializeOwned>(part: &str, what: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(part.trim_end_matches('='))
        .map_err(|e| WalletError::InvalidToken(format!("{} is not base64url: {}", what, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| WalletError::InvalidToken(format!("{} is not valid JSON: {}", what, e)))
}

/// Extract the fragment-encoded parameters of a redirect location. Accepts a
/// full URL, a bare `#fragment`, or the fragment body itself.
fn fragment_params(location: &str) -> Vec<(String, String)> {
    let location = location.trim();
    let fragment = match location.split_once('#') {
        Some((_, fragment)) => fragment,
        None => location,
    };
    url::form_urlencoded::parse(fragment.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Token carried by a redirect location, if any. Absent or malformed tokens
/// yield `None`: "no claims yet" is a normal state, not an error.
pub fn token_from_redirect(location: &str) -> Option<IdentityToken> {
    let raw = fragment_params(location)
        .into_iter()
        .find(|(k, _)| k == ID_TOKEN_PARAM)
        .map(|(_, v)| v)?;

    match IdentityToken::decode(&raw) {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::debug!("ignoring redirect token: {}", e);
            None
        }
    }
}
