use std::sync::Arc;

use chrono::{Duration, Utc};
use lyst_core::error::AuthError;
use lyst_core::identity::{
    AuthorizationPrompt, FirebaseGoogleProvider, FirebaseSettings, StoredSession, load_session,
    save_session,
};
use lyst_core::session::{IdentityProvider, SessionTracker, User};
use parking_lot::Mutex;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Pretends to be the user: reads `state` off the consent URL and pastes
/// back a redirect carrying `code`.
struct PasteRedirect {
    code: Option<&'static str>,
    seen_url: Arc<Mutex<Option<String>>>,
}

impl AuthorizationPrompt for PasteRedirect {
    fn authorize(&self, auth_url: &str) -> Option<String> {
        *self.seen_url.lock() = Some(auth_url.to_string());
        let code = self.code?;
        let url = Url::parse(auth_url).ok()?;
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())?;
        Some(format!(
            "http://localhost:8085/oauth2callback?code={code}&state={state}"
        ))
    }
}

fn settings(server: &MockServer) -> FirebaseSettings {
    FirebaseSettings {
        api_key: "test-key".to_string(),
        client_id: "client.apps.googleusercontent.com".to_string(),
        client_secret: "shh".to_string(),
        redirect_uri: "http://localhost:8085/oauth2callback".to_string(),
        auth_url: format!("{}/o/oauth2/v2/auth", server.uri()),
        token_url: format!("{}/token", server.uri()),
        identity_url: server.uri(),
        secure_token_url: server.uri(),
    }
}

fn ada() -> User {
    User {
        uid: "uid-ada".to_string(),
        email: Some("ada@example.com".to_string()),
        display_name: Some("Ada".to_string()),
    }
}

fn provider(
    server: &MockServer,
    dir: &std::path::Path,
    code: Option<&'static str>,
) -> (FirebaseGoogleProvider, Arc<Mutex<Option<String>>>) {
    let seen_url = Arc::new(Mutex::new(None));
    let prompt = PasteRedirect {
        code,
        seen_url: seen_url.clone(),
    };
    (
        FirebaseGoogleProvider::new(settings(server), dir, Box::new(prompt)),
        seen_url,
    )
}

#[tokio::test]
async fn sign_in_exchanges_code_and_persists_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "google-access",
            "id_token": "google-id-token",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:signInWithIdp"))
        .and(query_param("key", "test-key"))
        .and(body_string_contains("google-id-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "localId": "uid-ada",
            "email": "ada@example.com",
            "displayName": "Ada",
            "idToken": "firebase-id-token",
            "refreshToken": "firebase-refresh",
            "expiresIn": "3600"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir");
    let (provider, seen_url) = provider(&server, temp.path(), Some("auth-code"));

    let user = provider.sign_in().await.expect("sign in");
    assert_eq!(user, ada());

    let consent = seen_url.lock().clone().expect("consent url shown");
    assert!(consent.contains("code_challenge_method=S256"));
    assert!(consent.contains("client_id=client.apps.googleusercontent.com"));

    let stored = load_session(provider.session_path())
        .expect("load")
        .expect("session saved");
    assert_eq!(stored.refresh_token, "firebase-refresh");
    assert_eq!(
        provider.id_token(&user).await.expect("token"),
        "firebase-id-token"
    );
}

#[tokio::test]
async fn empty_paste_cancels_sign_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir");
    let (provider, _) = provider(&server, temp.path(), None);

    let err = provider.sign_in().await.expect_err("cancelled");
    assert!(matches!(err, AuthError::Cancelled));
    assert!(!provider.session_path().exists());
}

#[tokio::test]
async fn expired_token_is_refreshed_and_saved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .and(query_param("key", "test-key"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id_token": "fresh-id-token",
            "refresh_token": "new-refresh",
            "expires_in": "3600",
            "user_id": "uid-ada"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir");
    let (provider, _) = provider(&server, temp.path(), None);
    save_session(
        provider.session_path(),
        &StoredSession {
            user: ada(),
            id_token: "stale-id-token".to_string(),
            refresh_token: "old-refresh".to_string(),
            expires_at: Utc::now() - Duration::minutes(1),
        },
    )
    .expect("seed session");

    let user = provider.restore().await.expect("restore").expect("user");
    assert_eq!(
        provider.id_token(&user).await.expect("refresh"),
        "fresh-id-token"
    );
    // Cached now; a second call must not hit the endpoint again.
    assert_eq!(
        provider.id_token(&user).await.expect("cached"),
        "fresh-id-token"
    );

    let stored = load_session(provider.session_path())
        .expect("load")
        .expect("session");
    assert_eq!(stored.refresh_token, "new-refresh");
}

#[tokio::test]
async fn revoked_refresh_token_signs_the_user_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "TOKEN_EXPIRED" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir");
    let (provider, _) = provider(&server, temp.path(), None);
    save_session(
        provider.session_path(),
        &StoredSession {
            user: ada(),
            id_token: "stale".to_string(),
            refresh_token: "revoked".to_string(),
            expires_at: Utc::now() - Duration::minutes(1),
        },
    )
    .expect("seed session");
    let session_path = provider.session_path().to_path_buf();

    let tracker = SessionTracker::new(Arc::new(provider));
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    let _subscription = tracker.subscribe(move |user| {
        sink.lock().push(user.map(|u| u.uid.clone()));
    });

    tracker.start().await.expect("start");
    assert!(tracker.is_signed_in());

    let err = tracker.id_token().await.expect_err("revoked");
    assert!(matches!(err, AuthError::SessionExpired));
    assert!(!tracker.is_signed_in());
    assert!(!session_path.exists());
    assert_eq!(
        changes.lock().as_slice(),
        [Some("uid-ada".to_string()), None]
    );
}
