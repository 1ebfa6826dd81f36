// House service client
//
// Exchanges account credentials for a house access token. The cloud
// answers `getHouses` with the account's house ids and `getHouse` with
// the house document carrying `house_access_token`. Every request is
// authenticated with HTTP basic auth; no cookie or token is kept between
// calls.

use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::auth::Session;
use crate::error::AuthError;

/// Production house service.
pub const DEFAULT_CLOUD_URL: &str = "https://production.plum.technology";

const USER_AGENT: &str = concat!("lightpad/", env!("CARGO_PKG_VERSION"));
const GET_HOUSES_PATH: &str = "/v2/getHouses";
const GET_HOUSE_PATH: &str = "/v2/getHouse";

/// House document returned by `getHouse`. Only the fields needed to
/// mint a session are read; the rest of the document is ignored.
#[derive(Debug, Deserialize)]
struct HouseDocument {
    hid: String,
    #[serde(default)]
    house_name: Option<String>,
    house_access_token: String,
}

/// Raw HTTP client for the Plum house service.
pub struct HouseClient {
    http: reqwest::Client,
    base_url: Url,
    house_id: Option<String>,
    session_ttl: Option<Duration>,
}

impl HouseClient {
    /// Build a client with its own `reqwest::Client` (system roots, the
    /// cloud presents a publicly signed certificate).
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            house_id: None,
            session_ttl: None,
        }
    }

    /// Pin the house whose token is requested. Without it the first
    /// house on the account is used.
    pub fn for_house(mut self, house_id: impl Into<String>) -> Self {
        self.house_id = Some(house_id.into());
        self
    }

    /// Lifetime stamped on issued sessions. `None` means the token lives
    /// until a device rejects it.
    pub fn with_session_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Exchange `email` / `password` for a house-scoped session.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, AuthError> {
        let house_ids: Vec<String> = self
            .call(self.base_url.join(GET_HOUSES_PATH)?, None, email, password)
            .await?;
        debug!(houses = house_ids.len(), "house list received");

        let hid = match &self.house_id {
            Some(wanted) if house_ids.iter().any(|h| h == wanted) => wanted.clone(),
            Some(wanted) => {
                return Err(AuthError::HouseNotFound {
                    house_id: wanted.clone(),
                });
            }
            None => house_ids
                .into_iter()
                .next()
                .ok_or_else(|| AuthError::HouseNotFound {
                    house_id: "<any>".into(),
                })?,
        };

        let house: HouseDocument = self
            .call(
                self.base_url.join(GET_HOUSE_PATH)?,
                Some(json!({ "hid": hid })),
                email,
                password,
            )
            .await?;

        debug!(
            house_id = %house.hid,
            name = house.house_name.as_deref().unwrap_or(""),
            "house access token issued"
        );

        Ok(Session::new(
            house.hid,
            SecretString::from(house.house_access_token),
            self.session_ttl,
        ))
    }

    /// GET when `body` is `None`, POST with a JSON body otherwise.
    async fn call<T: DeserializeOwned>(
        &self,
        url: Url,
        body: Option<serde_json::Value>,
        email: &str,
        password: &SecretString,
    ) -> Result<T, AuthError> {
        let request = match body {
            Some(ref b) => {
                debug!("POST {}", url);
                self.http.post(url).json(b)
            }
            None => {
                debug!("GET {}", url);
                self.http.get(url)
            }
        };

        let resp = request
            .basic_auth(email, Some(password.expose_secret()))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        match status {
            s if s.is_success() => {
                serde_json::from_str(&text).map_err(|e| AuthError::Deserialization {
                    message: e.to_string(),
                    body: text,
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::InvalidCredentials {
                message: format!("login failed (HTTP {status})"),
            }),
            StatusCode::NOT_FOUND if body.is_some() => Err(AuthError::HouseNotFound {
                house_id: body
                    .as_ref()
                    .and_then(|b| b["hid"].as_str())
                    .unwrap_or_default()
                    .to_owned(),
            }),
            _ => Err(AuthError::ServiceUnavailable {
                reason: format!("HTTP {status}: {text}"),
            }),
        }
    }
}
