//! Google OAuth credentials for the calendar platform.
//!
//! The calendar client only needs a bearer token; [`CredentialProvider`] is
//! the seam. [`GoogleCredentials`] implements the installed-app flow: use the
//! stored token while it is valid, refresh it when it expired and a refresh
//! token exists, otherwise sign in again. Signing in uses PKCE and a loopback
//! listener on `127.0.0.1` that receives Google's redirect; an [`Authorizer`]
//! only has to get the consent page in front of a human. Every new token is
//! persisted through a [`TokenStore`].

use std::{
    fmt::Debug,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration as StdDuration,
};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::Rng as _;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};
use tracing::{debug, info, warn};

use crate::{config::OAuthClientConfig, provider::truncate_body};

pub const CALENDAR_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const CALLBACK_PATH: &str = "/callback";

/// How long sign-in waits for the browser to come back.
pub const CALLBACK_TIMEOUT: StdDuration = StdDuration::from_secs(300);

/// Verifier entropy in bytes, before base64.
const CODE_VERIFIER_LENGTH: usize = 32;

/// Tokens are treated as expired this long before Google says they are.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
}

impl Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("access_token", &"<redacted>").finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync + Debug {
    async fn credential(&self) -> Result<Credential>;
}

/// A token managed elsewhere.
#[derive(Debug, Clone)]
pub struct StaticCredential(Credential);

impl StaticCredential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self(Credential {
            access_token: access_token.into(),
        })
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self) -> Result<Credential> {
        Ok(self.0.clone())
    }
}

/// Gets a consent page in front of the person granting access.
///
/// Called once the loopback listener is accepting connections; the
/// authorization code arrives there, not through this trait.
#[async_trait]
pub trait Authorizer: Send + Sync + Debug {
    async fn present(&self, consent_url: &str) -> Result<()>;
}

/// PKCE verifier and challenge (RFC 7636) plus the anti-forgery `state`.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl Pkce {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let verifier_bytes: Vec<u8> = (0..CODE_VERIFIER_LENGTH).map(|_| rng.random()).collect();
        let state_bytes: Vec<u8> = (0..16).map(|_| rng.random()).collect();

        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);
        Self {
            challenge: challenge_for(&verifier),
            verifier,
            state: URL_SAFE_NO_PAD.encode(&state_bytes),
        }
    }
}

impl Default for Pkce {
    fn default() -> Self {
        Self::new()
    }
}

fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// What Google appended to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CallbackParams {
    code: String,
    state: Option<String>,
}

/// One-shot HTTP listener on a random loopback port for the OAuth redirect.
#[derive(Debug)]
pub struct LoopbackListener {
    listener: TcpListener,
    redirect_uri: String,
}

impl LoopbackListener {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind a loopback port for the OAuth redirect")?;
        let port = listener
            .local_addr()
            .context("Failed to read the loopback listener address")?
            .port();
        debug!("OAuth callback listener on port {port}");

        Ok(Self {
            listener,
            redirect_uri: format!("http://127.0.0.1:{port}{CALLBACK_PATH}"),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Serve requests until one hits the callback path, or give up after `timeout`.
    async fn wait_for_callback(self, timeout: StdDuration) -> Result<CallbackParams> {
        let serve = async {
            loop {
                let (mut stream, peer) = match self.listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("failed to accept OAuth callback connection: {e}");
                        continue;
                    }
                };
                match handle_callback(&mut stream).await {
                    Ok(Some(result)) => return result,
                    Ok(None) => debug!("ignored unrelated request from {peer}"),
                    Err(e) => warn!("failed to read OAuth callback request: {e}"),
                }
            }
        };

        tokio::time::timeout(timeout, serve)
            .await
            .map_err(|_| anyhow!("Timed out waiting for the browser to return from Google"))?
    }
}

const PAGE_OK: &str = "<html><body><h1>Signed in</h1>\
    <p>You can close this window and return to the terminal.</p></body></html>";
const PAGE_FAILED: &str = "<html><body><h1>Sign-in failed</h1>\
    <p>You can close this window.</p></body></html>";

async fn respond(stream: &mut TcpStream, status: &str, body: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// `Ok(None)` for requests that are not the redirect (favicon and the like).
async fn handle_callback(stream: &mut TcpStream) -> io::Result<Option<Result<CallbackParams>>> {
    let mut reader = BufReader::new(&mut *stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain headers so closing the socket does not reset the connection.
    let mut header = String::new();
    while reader.read_line(&mut header).await? > 2 {
        header.clear();
    }

    let mut parts = request_line.split_whitespace();
    let target = match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => target,
        _ => {
            respond(stream, "405 Method Not Allowed", "").await?;
            return Ok(None);
        }
    };

    let url = match Url::parse(&format!("http://127.0.0.1{target}")) {
        Ok(url) if url.path() == CALLBACK_PATH => url,
        _ => {
            respond(stream, "404 Not Found", "").await?;
            return Ok(None);
        }
    };

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    let result = match (param("error"), param("code")) {
        (Some(error), _) => Err(anyhow!("Authorization was denied: {error}")),
        (None, None) => Err(anyhow!("Google redirected without an authorization code")),
        (None, Some(code)) => Ok(CallbackParams {
            code,
            state: param("state"),
        }),
    };

    match &result {
        Ok(_) => respond(stream, "200 OK", PAGE_OK).await?,
        Err(_) => respond(stream, "400 Bad Request", PAGE_FAILED).await?,
    }
    Ok(Some(result))
}

/// OAuth token set as persisted on disk.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Debug for StoredToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredToken")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl StoredToken {
    fn expiry_from(expires_in_secs: Option<i64>) -> Option<DateTime<Utc>> {
        expires_in_secs.map(|secs| Utc::now() + Duration::seconds(secs - EXPIRY_MARGIN_SECS))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn credential(&self) -> Credential {
        Credential {
            access_token: self.access_token.clone(),
        }
    }
}

/// JSON file holding a [`StoredToken`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no token has been stored yet.
    pub fn load(&self) -> Result<Option<StoredToken>> {
        if !self.path.exists() {
            debug!("no token file at {}", self.path.display());
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file: {}", self.path.display()))?;

        let token = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse token file: {}", self.path.display()))?;

        Ok(Some(token))
    }

    /// Write through a temporary file and rename, so a crash never leaves a
    /// truncated token behind. The temporary file is created owner-only.
    pub fn save(&self, token: &StoredToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create token directory: {}", parent.display())
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(token).context("Failed to serialize token")?;

        // A leftover from an interrupted save would keep its old mode.
        match fs::remove_file(&temp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(e).with_context(|| {
                    format!("Failed to remove stale token file: {}", temp_path.display())
                });
            }
            _ => {}
        }

        write_private(&temp_path, contents.as_bytes())
            .with_context(|| format!("Failed to write token file: {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace token file: {}", self.path.display()))?;

        debug!("saved token to {}", self.path.display());
        Ok(())
    }

    /// Remove the token file. Returns whether there was one.
    pub fn clear(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove token file: {}", self.path.display()))?;
        info!("removed token file {}", self.path.display());
        Ok(true)
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::{io::Write, os::unix::fs::OpenOptionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

impl TokenResponse {
    fn scopes(&self) -> Option<Vec<String>> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(String::from).collect())
    }
}

/// Google's OAuth endpoints for one registered client.
#[derive(Debug, Clone)]
pub struct GoogleOAuth {
    client: OAuthClientConfig,
    auth_url: String,
    token_url: String,
    http: Client,
}

impl GoogleOAuth {
    pub fn new(client: OAuthClientConfig) -> Result<Self> {
        Self::with_endpoints(client, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL)
    }

    pub fn with_endpoints(
        client: OAuthClientConfig,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build HTTP client for Google OAuth")?;

        Ok(Self {
            client,
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            http,
        })
    }

    /// URL the user opens to grant read-only calendar access.
    pub fn consent_url(&self, redirect_uri: &str, pkce: &Pkce) -> Result<String> {
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", CALENDAR_READONLY_SCOPE),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", pkce.state.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .with_context(|| format!("Invalid authorization endpoint: {}", self.auth_url))?;

        Ok(url.into())
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<StoredToken> {
        let response = self
            .token_request(&[
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("code", code),
                ("code_verifier", verifier),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .await
            .context("Failed to exchange authorization code")?;

        let scopes = response
            .scopes()
            .unwrap_or_else(|| vec![CALENDAR_READONLY_SCOPE.to_string()]);

        Ok(StoredToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: StoredToken::expiry_from(response.expires_in),
            scopes,
        })
    }

    /// Refresh `token` in place. Google usually omits the refresh token on
    /// refresh, in which case the old one is kept; the same goes for `scope`.
    pub async fn refresh(&self, token: &mut StoredToken) -> Result<()> {
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or_else(|| anyhow!("Stored token has no refresh token"))?;

        let response = self
            .token_request(&[
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await
            .context("Failed to refresh access token")?;

        if let Some(scopes) = response.scopes() {
            token.scopes = scopes;
        }
        token.access_token = response.access_token;
        token.expires_at = StoredToken::expiry_from(response.expires_in);
        if let Some(rotated) = response.refresh_token {
            token.refresh_token = Some(rotated);
        }
        Ok(())
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let res = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .context("Failed to send request to the Google token endpoint")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read token endpoint response")?;

        if !status.is_success() {
            return Err(anyhow!(
                "Token endpoint answered with status {}: {}",
                status,
                truncate_body(&body)
            ));
        }

        serde_json::from_str(&body).context("Failed to parse token endpoint response")
    }
}

/// Stored token, then refresh, then interactive login.
#[derive(Debug)]
pub struct GoogleCredentials {
    store: TokenStore,
    oauth: Option<GoogleOAuth>,
    authorizer: Option<Arc<dyn Authorizer>>,
    callback_timeout: StdDuration,
    current: Mutex<Option<StoredToken>>,
}

impl GoogleCredentials {
    /// Without `oauth` only a stored, unexpired token can be used. Without an
    /// `authorizer` an expired token that cannot be refreshed is an error.
    pub fn new(
        store: TokenStore,
        oauth: Option<GoogleOAuth>,
        authorizer: Option<Arc<dyn Authorizer>>,
    ) -> Self {
        Self {
            store,
            oauth,
            authorizer,
            callback_timeout: CALLBACK_TIMEOUT,
            current: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: StdDuration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    async fn login(&self, oauth: &GoogleOAuth) -> Result<StoredToken> {
        let authorizer = self.authorizer.as_ref().ok_or_else(|| {
            anyhow!("No usable Google token stored.\nHint: run `sensors auth` to sign in.")
        })?;

        let listener = LoopbackListener::bind().await?;
        let redirect_uri = listener.redirect_uri().to_string();
        let pkce = Pkce::new();

        authorizer.present(&oauth.consent_url(&redirect_uri, &pkce)?).await?;
        let callback = listener.wait_for_callback(self.callback_timeout).await?;

        if callback.state.as_deref() != Some(pkce.state.as_str()) {
            return Err(anyhow!(
                "OAuth state mismatch: the authorization response does not belong to this sign-in"
            ));
        }

        let token = oauth
            .exchange_code(&callback.code, &pkce.verifier, &redirect_uri)
            .await?;
        if !token.has_scope(CALENDAR_READONLY_SCOPE) {
            return Err(anyhow!(
                "Google did not grant calendar access.\n\
                 Hint: run `sensors auth` again and allow reading your calendar."
            ));
        }

        info!("signed in to Google Calendar");
        Ok(token)
    }

    async fn obtain(&self, cached: Option<StoredToken>) -> Result<StoredToken> {
        let stored = match cached {
            Some(token) => Some(token),
            None => self.store.load()?,
        };

        if let Some(token) = &stored {
            if !token.is_expired() && token.has_scope(CALENDAR_READONLY_SCOPE) {
                return Ok(token.clone());
            }
        }

        let oauth = self.oauth.as_ref().ok_or_else(|| {
            anyhow!(
                "Google token in {} is missing or expired and no OAuth client is configured.\n\
                 Hint: set client_id and client_secret in the [events] section.",
                self.store.path().display()
            )
        })?;

        if let Some(mut token) = stored.filter(|t| t.refresh_token.is_some()) {
            match oauth.refresh(&mut token).await {
                Ok(()) if token.has_scope(CALENDAR_READONLY_SCOPE) => {
                    debug!("refreshed Google access token");
                    self.store.save(&token)?;
                    return Ok(token);
                }
                Ok(()) => warn!("Refreshed token does not grant calendar access, signing in again"),
                Err(e) => warn!("Token refresh failed, signing in again: {e:#}"),
            }
        }

        let token = self.login(oauth).await?;
        self.store.save(&token)?;
        Ok(token)
    }
}

#[async_trait]
impl CredentialProvider for GoogleCredentials {
    async fn credential(&self) -> Result<Credential> {
        let mut current = self.current.lock().await;
        let token = self.obtain(current.take()).await?;
        let credential = token.credential();
        *current = Some(token);
        Ok(credential)
    }
}
