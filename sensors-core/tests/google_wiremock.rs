//! Google Calendar provider and OAuth credential chain against a mock HTTP server.

use std::{
    sync::{Arc, Mutex},
    time::Duration as StdDuration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, TimeZone, Utc};
use sensors_core::{
    CalendarProvider, EventTime,
    auth::{
        Authorizer, CALENDAR_READONLY_SCOPE, CredentialProvider, GoogleCredentials, GoogleOAuth,
        StaticCredential, StoredToken, TokenStore,
    },
    config::OAuthClientConfig,
    provider::GoogleCalendarProvider,
};
use reqwest::Url;
use serde_json::json;
use sha2::{Digest, Sha256};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header, method, path, query_param},
};

fn calendar(server: &MockServer, token: &str) -> GoogleCalendarProvider {
    GoogleCalendarProvider::with_base_url(Arc::new(StaticCredential::new(token)), server.uri())
        .unwrap()
}

fn oauth(server: &MockServer) -> GoogleOAuth {
    GoogleOAuth::with_endpoints(
        OAuthClientConfig {
            client_id: "client-1".into(),
            client_secret: "s3cret".into(),
        },
        format!("{}/auth", server.uri()),
        format!("{}/token", server.uri()),
    )
    .unwrap()
}

fn stored(access: &str, expires_in: Duration, refresh: Option<&str>) -> StoredToken {
    StoredToken {
        access_token: access.into(),
        refresh_token: refresh.map(String::from),
        expires_at: Some(Utc::now() + expires_in),
        scopes: vec![CALENDAR_READONLY_SCOPE.to_string()],
    }
}

/// Plays the browser: follows the consent URL's redirect back to the loopback
/// listener, optionally with a forged `state`.
#[derive(Debug, Default)]
struct Browser {
    forged_state: Option<String>,
    presented: Mutex<Vec<String>>,
}

#[async_trait]
impl Authorizer for Browser {
    async fn present(&self, consent_url: &str) -> anyhow::Result<()> {
        self.presented.lock().unwrap().push(consent_url.to_string());

        let consent = Url::parse(consent_url)?;
        let param = |name: &str| {
            consent
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap()
        };
        let state = self.forged_state.clone().unwrap_or_else(|| param("state"));
        let mut redirect = Url::parse(&param("redirect_uri"))?;
        redirect
            .query_pairs_mut()
            .append_pair("code", "4/abc")
            .append_pair("state", &state);

        tokio::spawn(async move {
            let _ = reqwest::get(redirect).await;
        });
        Ok(())
    }
}

fn form_value(body: &[u8], name: &str) -> Option<String> {
    Url::parse(&format!("http://x/?{}", String::from_utf8_lossy(body)))
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn events_request_carries_token_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/team%40example.com/events"))
        .and(header("authorization", "Bearer tok-123"))
        .and(query_param("maxResults", "25"))
        .and(query_param("singleEvents", "true"))
        .and(query_param("orderBy", "startTime"))
        .and(query_param("timeMin", "2024-03-15T08:00:00+00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {
                    "id": "a",
                    "summary": "Standup",
                    "location": "Room 4",
                    "start": { "dateTime": "2024-03-15T10:00:00+01:00" },
                    "end": { "dateTime": "2024-03-15T10:15:00+01:00" }
                },
                { "id": "b", "status": "cancelled" },
                { "id": "c", "summary": "Holiday", "start": { "date": "2024-03-16" } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let time_min = Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap();
    let events = calendar(&server, "tok-123")
        .upcoming_events("team@example.com", time_min, 25)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].summary.as_deref(), Some("Standup"));
    assert_eq!(events[0].location.as_deref(), Some("Room 4"));
    assert_eq!(
        events[0].start,
        EventTime::DateTime(Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap())
    );
    assert!(matches!(events[1].start, EventTime::Date(_)));
    assert_eq!(events[1].end, None);
}

#[tokio::test]
async fn list_without_items_is_empty_not_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "kind": "calendar#events" })))
        .mount(&server)
        .await;

    let events = calendar(&server, "tok")
        .upcoming_events("primary", Utc::now(), 10)
        .await
        .unwrap();

    assert_eq!(events, Some(vec![]));
}

#[tokio::test]
async fn rejected_token_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = calendar(&server, "stale")
        .upcoming_events("primary", Utc::now(), 10)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn valid_stored_token_needs_no_network() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path().join("token.json"));
    store.save(&stored("still-good", Duration::hours(1), Some("r"))).unwrap();

    let credentials = GoogleCredentials::new(store, Some(oauth(&server)), None);
    let credential = credentials.credential().await.unwrap();

    assert_eq!(credential.access_token, "still-good");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .and(body_string_contains("client_secret=s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token.json");
    TokenStore::new(&path)
        .save(&stored("old", -Duration::minutes(5), Some("refresh-1")))
        .unwrap();

    let credentials = GoogleCredentials::new(TokenStore::new(&path), Some(oauth(&server)), None);
    assert_eq!(credentials.credential().await.unwrap().access_token, "fresh");
    // Cached in memory now.
    assert_eq!(credentials.credential().await.unwrap().access_token, "fresh");

    let saved = TokenStore::new(&path).load().unwrap().unwrap();
    assert_eq!(saved.access_token, "fresh");
    assert_eq!(saved.refresh_token.as_deref(), Some("refresh-1"));
    assert!(!saved.is_expired());
}

#[tokio::test]
async fn failed_refresh_falls_back_to_sign_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=4%2Fabc"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "signed-in",
            "refresh_token": "refresh-2",
            "expires_in": 3599,
            "scope": CALENDAR_READONLY_SCOPE
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path().join("token.json"));
    store.save(&stored("old", -Duration::minutes(5), Some("revoked"))).unwrap();

    let browser = Arc::new(Browser::default());
    let credentials = GoogleCredentials::new(
        store.clone(),
        Some(oauth(&server)),
        Some(browser.clone() as Arc<dyn Authorizer>),
    )
    .with_callback_timeout(StdDuration::from_secs(10));

    assert_eq!(credentials.credential().await.unwrap().access_token, "signed-in");

    let presented = browser.presented.lock().unwrap().clone();
    assert_eq!(presented.len(), 1);
    assert!(presented[0].starts_with(&format!("{}/auth?", server.uri())));
    assert!(presented[0].contains("client_id=client-1"));
    assert!(presented[0].contains("code_challenge_method=S256"));

    // The verifier sent to the token endpoint matches the challenge shown to Google.
    let consent = Url::parse(&presented[0]).unwrap();
    let challenge = consent
        .query_pairs()
        .find(|(k, _)| k == "code_challenge")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    let requests = server.received_requests().await.unwrap();
    let exchange = requests
        .iter()
        .find(|r| form_value(&r.body, "grant_type").as_deref() == Some("authorization_code"))
        .unwrap();
    let verifier = form_value(&exchange.body, "code_verifier").unwrap();
    assert_eq!(URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())), challenge);
    assert_eq!(
        form_value(&exchange.body, "redirect_uri"),
        consent
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| v.into_owned())
    );

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.refresh_token.as_deref(), Some("refresh-2"));
    assert!(saved.has_scope(CALENDAR_READONLY_SCOPE));
}

#[tokio::test]
async fn sign_in_rejects_mismatched_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "nope" })))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path().join("token.json"));
    let browser = Arc::new(Browser {
        forged_state: Some("attacker".into()),
        ..Default::default()
    });
    let credentials = GoogleCredentials::new(
        store.clone(),
        Some(oauth(&server)),
        Some(browser as Arc<dyn Authorizer>),
    )
    .with_callback_timeout(StdDuration::from_secs(10));

    let err = credentials.credential().await.unwrap_err();
    assert!(err.to_string().contains("state mismatch"), "{err:#}");
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn refresh_adopts_granted_scopes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "rescoped",
            "expires_in": 3600,
            "scope": format!("openid {CALENDAR_READONLY_SCOPE}")
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token.json");
    let mut unscoped = stored("valid", Duration::hours(1), Some("r"));
    unscoped.scopes.clear();
    TokenStore::new(&path).save(&unscoped).unwrap();

    let credentials = GoogleCredentials::new(TokenStore::new(&path), Some(oauth(&server)), None);
    for _ in 0..3 {
        assert_eq!(credentials.credential().await.unwrap().access_token, "rescoped");
    }

    let saved = TokenStore::new(&path).load().unwrap().unwrap();
    assert!(saved.has_scope(CALENDAR_READONLY_SCOPE));
    assert!(saved.has_scope("openid"));
}

#[tokio::test]
async fn refresh_without_calendar_scope_is_not_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "wrong-scope",
            "expires_in": 3600,
            "scope": "openid email"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path().join("token.json"));
    store.save(&stored("old", -Duration::minutes(5), Some("r"))).unwrap();

    let credentials = GoogleCredentials::new(store.clone(), Some(oauth(&server)), None);
    let err = credentials.credential().await.unwrap_err();

    assert!(err.to_string().contains("sensors auth"));
    assert_eq!(store.load().unwrap().unwrap().access_token, "old");
}

#[tokio::test]
async fn no_token_and_no_authorizer_is_an_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path().join("token.json"));

    let credentials = GoogleCredentials::new(store, Some(oauth(&server)), None);
    let err = credentials.credential().await.unwrap_err();

    assert!(err.to_string().contains("sensors auth"));
    assert!(server.received_requests().await.unwrap().is_empty());
}
