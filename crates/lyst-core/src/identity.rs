//! Identity providers backing `SessionTracker`.
//!
//! `FirebaseGoogleProvider` signs in with Google (installed-app OAuth with
//! PKCE), trades the Google ID token for a Firebase session and keeps that
//! session in `<data dir>/session.json`. Tokens are never logged in full.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::error::AuthError;
use crate::session::{IdentityProvider, User};

const SESSION_FILE: &str = "session.json";

const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com";
const DEFAULT_SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:8085/oauth2callback";
const SCOPES: &str = "openid email profile";

/// Refresh this long before the provider's stated expiry.
const EXPIRY_SKEW_SECS: i64 = 5 * 60;

/// Interactive half of the sign-in flow.
pub trait AuthorizationPrompt: Send + Sync {
    /// Shows `auth_url` to the user and returns what they paste back: the
    /// redirected URL, a `code=..&state=..` query, or a bare code. `None`
    /// means the user gave up.
    fn authorize(&self, auth_url: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct FirebaseSettings {
    pub api_key: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub identity_url: String,
    pub secure_token_url: String,
}

impl FirebaseSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let get = |key: &str, default: &str| cfg.get(key).unwrap_or_else(|| default.to_string());
        Self {
            api_key: get("firebase.api_key", ""),
            client_id: get("google.client_id", ""),
            client_secret: get("google.client_secret", ""),
            redirect_uri: get("google.redirect_uri", DEFAULT_REDIRECT_URI),
            auth_url: get("google.auth_url", DEFAULT_AUTH_URL),
            token_url: get("google.token_url", DEFAULT_TOKEN_URL),
            identity_url: get("firebase.identity_url", DEFAULT_IDENTITY_URL),
            secure_token_url: get("firebase.secure_token_url", DEFAULT_SECURE_TOKEN_URL),
        }
    }
}

/// Persisted Firebase session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub user: User,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_SKEW_SECS) >= self.expires_at
    }
}

pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

pub fn generate_pkce() -> Pkce {
    let mut verifier_bytes = [0u8; 32];
    verifier_bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    verifier_bytes[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    Pkce {
        verifier,
        challenge,
    }
}

/// Splits pasted authorization input into (code, state).
pub fn parse_authorization_input(input: &str) -> (Option<String>, Option<String>) {
    let value = input.trim();
    if value.is_empty() {
        return (None, None);
    }

    let pick = |pairs: Vec<(String, String)>| {
        let code = pairs.iter().find(|(k, _)| k == "code").map(|(_, v)| v.clone());
        let state = pairs.iter().find(|(k, _)| k == "state").map(|(_, v)| v.clone());
        (code, state)
    };

    if let Ok(url) = Url::parse(value) {
        return pick(url.query_pairs().into_owned().collect());
    }

    if value.contains("code=") {
        let query = value.trim_start_matches('?');
        return pick(url::form_urlencoded::parse(query.as_bytes()).into_owned().collect());
    }

    (Some(value.to_string()), None)
}

pub fn mask_token(token: &str) -> String {
    if token.len() <= 12 {
        return "***".to_string();
    }
    let head: String = token.chars().take(8).collect();
    format!("{head}...")
}

pub struct FirebaseGoogleProvider {
    settings: FirebaseSettings,
    session_path: PathBuf,
    http: reqwest::Client,
    prompt: Box<dyn AuthorizationPrompt>,
    cached: Mutex<Option<StoredSession>>,
}

impl FirebaseGoogleProvider {
    pub fn new(
        settings: FirebaseSettings,
        data_dir: &Path,
        prompt: Box<dyn AuthorizationPrompt>,
    ) -> Self {
        Self {
            settings,
            session_path: data_dir.join(SESSION_FILE),
            http: reqwest::Client::new(),
            prompt,
            cached: Mutex::new(None),
        }
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    pub fn build_auth_url(&self, pkce: &Pkce, state: &str) -> Result<String, AuthError> {
        let mut url = Url::parse(&self.settings.auth_url)
            .map_err(|e| AuthError::Provider(format!("invalid google.auth_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state)
            .append_pair("prompt", "select_account");
        Ok(url.to_string())
    }

    fn endpoint(&self, base: &str, path: &str) -> Result<Url, AuthError> {
        let mut url = Url::parse(base)
            .and_then(|b| b.join(path))
            .map_err(|e| AuthError::Provider(format!("invalid endpoint {base}{path}: {e}")))?;
        url.query_pairs_mut().append_pair("key", &self.settings.api_key);
        Ok(url)
    }

    #[instrument(skip(self, code, pkce))]
    async fn exchange_code(&self, code: &str, pkce: &Pkce) -> Result<String, AuthError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("client_secret", &self.settings.client_secret)
            .append_pair("code", code)
            .append_pair("code_verifier", &pkce.verifier)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .finish();

        let token: GoogleTokenResponse = self.post_form(&self.settings.token_url, body).await?;
        token
            .id_token
            .ok_or_else(|| AuthError::Provider("google token response had no id_token".to_string()))
    }

    #[instrument(skip(self, google_id_token))]
    async fn sign_in_with_idp(&self, google_id_token: &str) -> Result<StoredSession, AuthError> {
        let url = self.endpoint(&self.settings.identity_url, "v1/accounts:signInWithIdp")?;
        let post_body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id_token", google_id_token)
            .append_pair("providerId", "google.com")
            .finish();
        let payload = serde_json::json!({
            "postBody": post_body,
            "requestUri": self.settings.redirect_uri,
            "returnSecureToken": true,
            "returnIdpCredential": true,
        });

        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("signInWithIdp request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Provider(format!(
                "signInWithIdp failed (HTTP {status}): {body}"
            )));
        }

        let data: IdpResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("invalid signInWithIdp response: {e}")))?;

        Ok(StoredSession {
            user: User {
                uid: data.local_id,
                email: data.email,
                display_name: data.display_name,
            },
            id_token: data.id_token,
            refresh_token: data.refresh_token,
            expires_at: expires_at(&data.expires_in),
        })
    }

    #[instrument(skip(self, session), fields(uid = %session.user.uid))]
    async fn refresh(&self, session: &StoredSession) -> Result<StoredSession, AuthError> {
        let url = self.endpoint(&self.settings.secure_token_url, "v1/token")?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", &session.refresh_token)
            .finish();

        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_session_revoked(&body) {
                return Err(AuthError::SessionExpired);
            }
            return Err(AuthError::Provider(format!(
                "token refresh failed (HTTP {status}): {body}"
            )));
        }

        let data: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("invalid token refresh response: {e}")))?;

        debug!(token = %mask_token(&data.id_token), "refreshed id token");
        Ok(StoredSession {
            user: session.user.clone(),
            id_token: data.id_token,
            refresh_token: data.refresh_token,
            expires_at: expires_at(&data.expires_in),
        })
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: String,
    ) -> Result<T, AuthError> {
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Provider(format!(
                "token exchange failed (HTTP {status}): {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("invalid response from {url}: {e}")))
    }

    fn store(&self, session: StoredSession) -> Result<(), AuthError> {
        save_session(&self.session_path, &session)?;
        *self.cached.lock() = Some(session);
        Ok(())
    }

    fn forget(&self) -> Result<(), AuthError> {
        *self.cached.lock() = None;
        match fs::remove_file(&self.session_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err)),
        }
    }
}

#[async_trait]
impl IdentityProvider for FirebaseGoogleProvider {
    #[instrument(skip(self))]
    async fn restore(&self) -> Result<Option<User>, AuthError> {
        let session = load_session(&self.session_path)?;
        let user = session.as_ref().map(|s| s.user.clone());
        *self.cached.lock() = session;
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn sign_in(&self) -> Result<User, AuthError> {
        if self.settings.api_key.is_empty() || self.settings.client_id.is_empty() {
            return Err(AuthError::Provider(
                "firebase.api_key and google.client_id must be configured".to_string(),
            ));
        }

        let pkce = generate_pkce();
        let state = uuid::Uuid::new_v4().to_string();
        let auth_url = self.build_auth_url(&pkce, &state)?;

        let Some(input) = self.prompt.authorize(&auth_url) else {
            return Err(AuthError::Cancelled);
        };
        let (code, returned_state) = parse_authorization_input(&input);
        let code = code.ok_or(AuthError::Cancelled)?;
        if let Some(returned) = returned_state
            && returned != state
        {
            return Err(AuthError::Provider("OAuth state mismatch".to_string()));
        }

        let google_id_token = self.exchange_code(&code, &pkce).await?;
        let session = self.sign_in_with_idp(&google_id_token).await?;
        let user = session.user.clone();
        self.store(session)?;

        info!(uid = %user.uid, session = %self.session_path.display(), "stored firebase session");
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), AuthError> {
        self.forget()
    }

    #[instrument(skip(self, user), fields(uid = %user.uid))]
    async fn id_token(&self, user: &User) -> Result<String, AuthError> {
        let current = self.cached.lock().clone();
        let session = match current {
            Some(session) if session.user.uid == user.uid => session,
            _ => return Err(AuthError::NotSignedIn),
        };

        if !session.is_expired(Utc::now()) {
            return Ok(session.id_token);
        }

        debug!(expires_at = %session.expires_at, "id token expired; refreshing");
        match self.refresh(&session).await {
            Ok(fresh) => {
                let token = fresh.id_token.clone();
                self.store(fresh)?;
                Ok(token)
            }
            Err(AuthError::SessionExpired) => {
                if let Err(err) = self.forget() {
                    warn!(error = %err, "failed to remove revoked session file");
                }
                Err(AuthError::SessionExpired)
            }
            Err(err) => Err(err),
        }
    }
}

/// Fixed bearer token, for development servers and scripted use.
pub struct StaticTokenProvider {
    token: Option<String>,
    signed_in: Mutex<bool>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        Self {
            signed_in: Mutex::new(token.is_some()),
            token,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let token = cfg.get("auth.token").or_else(|| std::env::var("LYST_TOKEN").ok());
        Self::new(token)
    }

    fn user() -> User {
        User {
            uid: "static".to_string(),
            email: None,
            display_name: Some("token user".to_string()),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn restore(&self) -> Result<Option<User>, AuthError> {
        Ok((*self.signed_in.lock()).then(Self::user))
    }

    async fn sign_in(&self) -> Result<User, AuthError> {
        if self.token.is_none() {
            return Err(AuthError::Provider(
                "auth.token or LYST_TOKEN must be set for the token provider".to_string(),
            ));
        }
        *self.signed_in.lock() = true;
        Ok(Self::user())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.signed_in.lock() = false;
        Ok(())
    }

    async fn id_token(&self, _user: &User) -> Result<String, AuthError> {
        if !*self.signed_in.lock() {
            return Err(AuthError::NotSignedIn);
        }
        self.token.clone().ok_or(AuthError::NotSignedIn)
    }
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdpResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

fn expires_at(expires_in: &str) -> DateTime<Utc> {
    let secs = expires_in.trim().parse::<i64>().unwrap_or_else(|err| {
        warn!(expires_in, error = %err, "unparseable token lifetime; assuming one hour");
        3600
    });
    Utc::now() + Duration::seconds(secs)
}

fn is_session_revoked(body: &str) -> bool {
    ["TOKEN_EXPIRED", "INVALID_REFRESH_TOKEN", "USER_NOT_FOUND", "USER_DISABLED"]
        .iter()
        .any(|code| body.contains(code))
}

#[instrument(skip(path))]
pub fn load_session(path: &Path) -> Result<Option<StoredSession>, AuthError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    match serde_json::from_str::<StoredSession>(&raw) {
        Ok(session) => Ok(Some(session)),
        Err(err) => {
            warn!(file = %path.display(), error = %err, "ignoring unreadable session file");
            Ok(None)
        }
    }
}

#[instrument(skip(path, session))]
pub fn save_session(path: &Path, session: &StoredSession) -> Result<(), AuthError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let serialized = serde_json::to_string_pretty(session)
        .map_err(|e| AuthError::Provider(format!("failed to serialize session: {e}")))?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(serialized.as_bytes())?;
    temp.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o600))?;
    }

    temp.persist(path).map_err(|err| AuthError::Io(err.error))?;
    debug!(file = %path.display(), "saved session");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(expires_at: DateTime<Utc>) -> StoredSession {
        StoredSession {
            user: User {
                uid: "u1".to_string(),
                email: Some("a@example.com".to_string()),
                display_name: Some("Ada".to_string()),
            },
            id_token: "id-token-value-long".to_string(),
            refresh_token: "refresh-value".to_string(),
            expires_at,
        }
    }

    #[test]
    fn expiry_includes_skew() {
        let now = Utc::now();
        assert!(sample_session(now + Duration::seconds(60)).is_expired(now));
        assert!(!sample_session(now + Duration::hours(1)).is_expired(now));
    }

    #[test]
    fn parses_redirect_url_query_and_bare_code() {
        let (code, state) =
            parse_authorization_input("http://localhost:8085/oauth2callback?code=abc&state=xyz");
        assert_eq!(code.as_deref(), Some("abc"));
        assert_eq!(state.as_deref(), Some("xyz"));

        let (code, state) = parse_authorization_input("code=4%2Fdef&state=s1");
        assert_eq!(code.as_deref(), Some("4/def"));
        assert_eq!(state.as_deref(), Some("s1"));

        let (code, state) = parse_authorization_input("  raw-code  ");
        assert_eq!(code.as_deref(), Some("raw-code"));
        assert!(state.is_none());

        assert_eq!(parse_authorization_input("   "), (None, None));
    }

    #[test]
    fn pkce_challenge_is_base64url_sha256() {
        let pkce = generate_pkce();
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(pkce.challenge.len(), 43);
        assert!(!pkce.challenge.contains('='));
    }

    #[test]
    fn token_lifetime_falls_back_to_an_hour() {
        let before = Utc::now();
        let parsed = expires_at(" 120 ");
        assert!(parsed >= before + Duration::seconds(120));
        assert!(parsed < before + Duration::seconds(180));

        let fallback = expires_at("soon");
        assert!(fallback >= before + Duration::seconds(3600));
        assert!(fallback < before + Duration::seconds(3660));
    }

    #[test]
    fn masks_tokens() {
        assert_eq!(mask_token("short"), "***");
        assert_eq!(mask_token("abcdefghijklmnop"), "abcdefgh...");
    }

    #[test]
    fn session_file_roundtrip_and_removal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        assert!(load_session(&path).expect("load missing").is_none());

        let session = sample_session(Utc::now() + Duration::hours(1));
        save_session(&path, &session).expect("save");

        let loaded = load_session(&path).expect("load").expect("present");
        assert_eq!(loaded.user, session.user);
        assert_eq!(loaded.refresh_token, "refresh-value");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn corrupt_session_file_is_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        fs::write(&path, "{not json").expect("write");
        assert!(load_session(&path).expect("load").is_none());
    }

    #[tokio::test]
    async fn static_provider_requires_token() {
        let provider = StaticTokenProvider::new(None);
        assert!(provider.restore().await.expect("restore").is_none());
        assert!(matches!(provider.sign_in().await, Err(AuthError::Provider(_))));

        let provider = StaticTokenProvider::new(Some("dev-token".to_string()));
        let user = provider.restore().await.expect("restore").expect("signed in");
        assert_eq!(provider.id_token(&user).await.expect("token"), "dev-token");

        provider.sign_out().await.expect("sign out");
        assert!(matches!(provider.id_token(&user).await, Err(AuthError::NotSignedIn)));
    }
}
