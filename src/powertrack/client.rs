use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use super::PowerTrackError;
use super::types::{ErrorBody, Page, PageRequest, Rule, TokenResponse};
use crate::config::{Auth, Credentials, Secret};

const TOKEN_PATH: &str = "/oauth2/token";

/// RFC 3986 unreserved characters stay as-is; everything else is escaped.
const CREDENTIAL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Fetches single result pages for a rule.
/// Implemented by `PowerTrackClient` for production; in-memory fakes are used in tests.
pub trait PowerTrackApi {
    async fn fetch_page<T: DeserializeOwned>(
        &self,
        rule: &Rule,
        next: Option<&str>,
    ) -> Result<Page<T>, PowerTrackError>;
}

/// HTTP client bound to one endpoint (search or counts) and its credentials.
///
/// With a consumer key/secret pair, a bearer token is requested on first use and reused afterwards.
#[derive(Clone)]
pub struct PowerTrackClient {
    http: Client,
    endpoint: Url,
    token_url: Url,
    auth: Auth,
    token: Arc<OnceCell<Secret>>,
}

impl PowerTrackClient {
    pub fn new(http: Client, credentials: &Credentials) -> Self {
        let endpoint = credentials.endpoint.clone();
        let token_url = endpoint
            .join(TOKEN_PATH)
            .unwrap_or_else(|_| endpoint.clone());
        Self {
            http,
            endpoint,
            token_url,
            auth: credentials.auth.clone(),
            token: Arc::new(OnceCell::new()),
        }
    }

    async fn bearer_token(&self) -> Result<&Secret, PowerTrackError> {
        match &self.auth {
            Auth::Bearer(token) => Ok(token),
            Auth::ConsumerKey { key, secret } => {
                self.token
                    .get_or_try_init(|| self.request_bearer_token(key, secret))
                    .await
            }
        }
    }

    async fn request_bearer_token(
        &self,
        key: &Secret,
        secret: &Secret,
    ) -> Result<Secret, PowerTrackError> {
        let basic = format!(
            "{}:{}",
            utf8_percent_encode(key.expose(), CREDENTIAL_ENCODE_SET),
            utf8_percent_encode(secret.expose(), CREDENTIAL_ENCODE_SET)
        );

        let response = self
            .http
            .post(self.token_url.clone())
            .header(AUTHORIZATION, format!("Basic {}", STANDARD.encode(basic)))
            .header(
                CONTENT_TYPE,
                "application/x-www-form-urlencoded;charset=UTF-8",
            )
            .header(USER_AGENT, crate::USER_AGENT)
            .body("grant_type=client_credentials")
            .send()
            .await?;

        let body: TokenResponse = check_status(response).await?.json().await?;
        if let Some(kind) = &body.token_type
            && !kind.eq_ignore_ascii_case("bearer")
        {
            return Err(PowerTrackError::Unauthorized(format!(
                "unexpected token type '{kind}'"
            )));
        }

        debug!("bearer token obtained");
        Ok(Secret::new(body.access_token))
    }
}

impl PowerTrackApi for PowerTrackClient {
    async fn fetch_page<T: DeserializeOwned>(
        &self,
        rule: &Rule,
        next: Option<&str>,
    ) -> Result<Page<T>, PowerTrackError> {
        let token = self.bearer_token().await?;

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(token.expose())
            .header(USER_AGENT, crate::USER_AGENT)
            .json(&PageRequest { rule, next })
            .send()
            .await?;

        let page: Page<T> = check_status(response).await?.json().await?;
        debug!(
            results = page.results.len(),
            has_next = page.next.is_some(),
            "page fetched"
        );
        Ok(page)
    }
}

async fn check_status(response: Response) -> Result<Response, PowerTrackError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response
        .text()
        .await
        .unwrap_or_else(|_| format!("HTTP {status}"));
    let message = extract_error_message(&text);

    match status.as_u16() {
        429 => {
            warn!("PowerTrack API rate limited");
            Err(PowerTrackError::RateLimited)
        }
        401 | 403 => {
            warn!(status = %status, "PowerTrack API rejected credentials");
            Err(PowerTrackError::Unauthorized(message))
        }
        code => {
            warn!(status = %status, "PowerTrack API error");
            Err(PowerTrackError::Api { code, message })
        }
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.chars().take(200).collect())
}
