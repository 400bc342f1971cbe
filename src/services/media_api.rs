//! Client for the business-listing media API.
//!
//! Photos are never uploaded as bytes: the API is handed a public URL to the
//! stored blob and fetches it itself. Calls authenticate with a bearer token
//! minted from a service-account key scoped to business management.

use crate::errors::{PipelineError, PipelineResult};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt,
    path::PathBuf,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub const BUSINESS_MANAGE_SCOPE: &str = "https://www.googleapis.com/auth/business.manage";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before they actually expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Media categories accepted by the listing API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaCategory {
    #[serde(rename = "CATEGORY_UNSPECIFIED")]
    Unspecified,
    Cover,
    Profile,
    Logo,
    Exterior,
    Interior,
    #[default]
    Product,
    AtWork,
    FoodAndDrink,
    Menu,
    CommonArea,
    Rooms,
    Teams,
    Additional,
}

/// Accepts the API spelling in any case, e.g. `product` or `AT_WORK`.
impl std::str::FromStr for MediaCategory {
    type Err = serde_json::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(raw.trim().to_ascii_uppercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationAssociation {
    pub category: MediaCategory,
}

/// Body of `POST /accounts/{accountId}/locations/{locationId}/media`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMediaRequest {
    pub media_format: &'static str,
    pub location_association: LocationAssociation,
    pub source_url: String,
    pub description: String,
}

impl CreateMediaRequest {
    /// A store photo in `category`, fetched from `source_url`.
    pub fn photo(category: MediaCategory, source_url: impl Into<String>, file_name: &str) -> Self {
        Self {
            media_format: "PHOTO",
            location_association: LocationAssociation { category },
            source_url: source_url.into(),
            description: format!("Store photo - {}", file_name),
        }
    }
}

/// Bearer token for the media API.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

/// Issues credentials for the media API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> PipelineResult<AccessToken>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaApi: Send + Sync {
    /// Create a media item for `location_id`; returns the created-media
    /// descriptor. Non-success statuses are `ExternalApi` errors.
    async fn create_media(
        &self,
        token: &AccessToken,
        location_id: &str,
        request: &CreateMediaRequest,
    ) -> PipelineResult<Value>;
}

#[derive(Clone)]
pub struct BusinessProfileClient {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
}

impl BusinessProfileClient {
    pub fn new(
        base_url: impl Into<String>,
        account_id: impl Into<String>,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            account_id: account_id.into(),
        })
    }

    fn media_url(&self, location_id: &str) -> String {
        format!(
            "{}/accounts/{}/locations/{}/media",
            self.base_url.trim_end_matches('/'),
            self.account_id,
            location_id
        )
    }
}

#[async_trait]
impl MediaApi for BusinessProfileClient {
    #[instrument(skip(self, token, request), fields(source_url = %request.source_url))]
    async fn create_media(
        &self,
        token: &AccessToken,
        location_id: &str,
        request: &CreateMediaRequest,
    ) -> PipelineResult<Value> {
        let response = self
            .http
            .post(self.media_url(location_id))
            .bearer_auth(&token.0)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        info!(status_code = status.as_u16(), response_text = %body, "received media creation response");

        if !status.is_success() {
            return Err(PipelineError::ExternalApi {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| PipelineError::ExternalApi {
            status: status.as_u16(),
            body: format!("unparseable response ({}): {}", err, body),
        })
    }
}

/// Fields of a service-account key file this client needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges a signed JWT assertion from a service-account key file for an
/// access token, caching it until shortly before expiry.
pub struct ServiceAccountTokenSource {
    http: reqwest::Client,
    key_file: PathBuf,
    scope: String,
    cached: Mutex<Option<(AccessToken, Instant)>>,
}

impl ServiceAccountTokenSource {
    pub fn new(key_file: impl Into<PathBuf>, timeout: Duration) -> PipelineResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            key_file: key_file.into(),
            scope: BUSINESS_MANAGE_SCOPE.to_string(),
            cached: Mutex::new(None),
        })
    }

    async fn load_key(&self) -> PipelineResult<ServiceAccountKey> {
        let raw = tokio::fs::read(&self.key_file).await.map_err(|err| {
            PipelineError::Authentication(format!(
                "reading key file {}: {}",
                self.key_file.display(),
                err
            ))
        })?;
        serde_json::from_slice(&raw).map_err(|err| {
            PipelineError::Authentication(format!(
                "parsing key file {}: {}",
                self.key_file.display(),
                err
            ))
        })
    }

    fn sign_assertion(&self, key: &ServiceAccountKey) -> PipelineResult<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: &self.scope,
            aud: &key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|err| PipelineError::Authentication(format!("invalid private key: {}", err)))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|err| PipelineError::Authentication(format!("signing assertion: {}", err)))
    }

    async fn exchange(&self, key: &ServiceAccountKey, assertion: &str) -> PipelineResult<TokenResponse> {
        let auth_err = |err: reqwest::Error| PipelineError::Authentication(err.to_string());
        let response = self
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
            .send()
            .await
            .map_err(auth_err)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Authentication(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        response.json::<TokenResponse>().await.map_err(auth_err)
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> PipelineResult<AccessToken> {
        let mut cached = self.cached.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() < *expires_at {
                debug!("reusing cached access token");
                return Ok(token.clone());
            }
        }

        let key = self.load_key().await?;
        let assertion = self.sign_assertion(&key)?;
        let response = self.exchange(&key, &assertion).await?;

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(TOKEN_LIFETIME_SECS as u64));
        let token = AccessToken(response.access_token);
        *cached = Some((
            token.clone(),
            Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        ));
        info!(client_email = %key.client_email, "authentication successful");
        Ok(token)
    }
}
