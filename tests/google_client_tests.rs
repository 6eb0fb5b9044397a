//! Google Calendar client integration tests against a mocked API server.

mod test_utils;

use caldav_sync::config::GoogleConfig;
use caldav_sync::error::GoogleError;
use caldav_sync::google::{GoogleAdapter, GoogleCalendarClient};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use test_utils::{StaticTokenProvider, google_event};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> GoogleConfig {
    GoogleConfig {
        api_base_url: server.uri(),
        rate_limit_delay_ms: 0,
        max_retries: 3,
        ..GoogleConfig::default()
    }
}

fn client(server: &MockServer) -> GoogleCalendarClient {
    GoogleCalendarClient::new(config(server), Arc::new(StaticTokenProvider::new()))
        .expect("client builds")
}

#[tokio::test]
async fn get_events_exhausts_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("singleEvents", "true"))
        .and(query_param("orderBy", "startTime"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "evt-2",
                "iCalUID": "uid-2",
                "summary": "Second",
                "start": {"dateTime": "2025-01-16T09:00:00Z"},
                "end": {"dateTime": "2025-01-16T10:00:00Z"}
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("singleEvents", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "evt-1",
                "iCalUID": "uid-1",
                "summary": "First",
                "start": {"dateTime": "2025-01-15T09:00:00Z"},
                "end": {"dateTime": "2025-01-15T10:00:00Z"}
            }],
            "nextPageToken": "page-2"
        })))
        .mount(&server)
        .await;

    let start = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 2, 14, 0, 0, 0).unwrap();

    let events = client(&server)
        .get_events("primary", start, end)
        .await
        .expect("fetch succeeds");

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].uid(), "uid-1");
    assert_eq!(events[1].uid(), "uid-2");
}

#[tokio::test]
async fn rate_limit_is_retried_with_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "0"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "evt-1",
                "iCalUID": "uid-1",
                "summary": "After retry",
                "start": {"dateTime": "2025-01-15T09:00:00Z"},
                "end": {"dateTime": "2025-01-15T10:00:00Z"}
            }]
        })))
        .mount(&server)
        .await;

    let start = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2025, 2, 14, 0, 0, 0).unwrap();

    let events = client(&server)
        .get_events("primary", start, end)
        .await
        .expect("retried fetch succeeds");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].summary, "After retry");
}

#[tokio::test]
async fn persistent_rate_limit_surfaces_rate_limited_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .mount(&server)
        .await;

    let error = client(&server)
        .list_calendars()
        .await
        .expect_err("rate limit persists");
    assert!(matches!(error, GoogleError::RateLimited { .. }));
}

#[tokio::test]
async fn invalid_grant_surfaces_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .mount(&server)
        .await;

    let error = client(&server)
        .list_calendars()
        .await
        .expect_err("auth fails");
    assert!(matches!(error, GoogleError::Auth(_)));
}

#[tokio::test]
async fn delete_treats_404_as_success() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/calendars/primary/events/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    client(&server)
        .delete_event("primary", "gone")
        .await
        .expect("idempotent delete");
}

#[tokio::test]
async fn create_event_sends_ical_uid_and_returns_server_copy() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/calendars/primary/events"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "created-1",
            "iCalUID": "uid-9",
            "summary": "Review",
            "start": {"dateTime": "2025-01-15T09:00:00Z"},
            "end": {"dateTime": "2025-01-15T10:00:00Z"},
            "updated": "2025-01-15T11:00:00.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let event = google_event("uid-9", "ignored", "Review", 8);
    let mut request_event = event.clone();
    request_event.id = None;

    let created = client(&server)
        .create_event("primary", &request_event)
        .await
        .expect("create succeeds");

    assert_eq!(created.id.as_deref(), Some("created-1"));
    assert_eq!(created.uid(), "uid-9");
    assert!(created.updated.is_some());

    let requests = server.received_requests().await.expect("recorded");
    let body: serde_json::Value =
        serde_json::from_slice(&requests[0].body).expect("json body");
    assert_eq!(body["iCalUID"], "uid-9");
    assert!(body.get("id").is_none());
}

#[tokio::test]
async fn server_errors_back_off_and_recover() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/me/calendarList"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/me/calendarList"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "primary", "summary": "Primary", "primary": true}]
        })))
        .mount(&server)
        .await;

    let calendars = client(&server)
        .list_calendars()
        .await
        .expect("recovered after 5xx");
    assert_eq!(calendars.len(), 1);
    assert!(calendars[0].primary);
}
