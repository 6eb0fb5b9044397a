//! Google Calendar v3 client over reqwest.
//!
//! Every request goes through a single retry helper: 429 sleeps for the
//! server's `Retry-After`, 5xx backs off exponentially, revoked credentials
//! invalidate the cached token and surface as auth errors. Successful calls
//! are paced by a configurable delay to stay under query quotas.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::GoogleConfig;
use crate::error::GoogleError;
use crate::event::GoogleEvent;
use crate::google::wire::{CalendarListResponse, EventListResponse, EventResource};
use crate::google::{AccessTokenProvider, GoogleAdapter, GoogleCalendarInfo};

pub struct GoogleCalendarClient {
    http: Client,
    config: GoogleConfig,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl GoogleCalendarClient {
    pub fn new(
        config: GoogleConfig,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, GoogleError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GoogleError::Protocol(format!("client setup failed: {e}")))?;

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, GoogleError> {
        let mut url = Url::parse(&self.config.api_base_url)
            .map_err(|e| GoogleError::Protocol(format!("invalid API base URL: {e}")))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| GoogleError::Protocol("API base URL cannot be a base".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// Central request path implementing the retry policy.
    async fn execute_with_retry(
        &self,
        context: &str,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&EventResource>,
    ) -> Result<reqwest::Response, GoogleError> {
        let max_attempts = self.config.max_retries.max(1);

        for attempt in 0..max_attempts {
            let token = self.tokens.access_token().await?;

            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(token.as_str());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(GoogleError::from)?;
            let status = response.status();

            if status.is_success() {
                self.pace().await;
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);

                if attempt + 1 < max_attempts {
                    warn!(context, attempt, retry_after, "rate limit hit, retrying");
                    sleep(Duration::from_secs(retry_after)).await;
                    continue;
                }
                return Err(GoogleError::RateLimited {
                    retry_after_secs: Some(retry_after),
                });
            }

            if status.is_server_error() {
                if attempt + 1 < max_attempts {
                    let backoff = 2u64.pow(attempt);
                    warn!(context, attempt, backoff, %status, "server error, backing off");
                    sleep(Duration::from_secs(backoff)).await;
                    continue;
                }
                return Err(GoogleError::Protocol(format!("{context}: HTTP {status}")));
            }

            let body_text = response.text().await.unwrap_or_default();

            if is_revoked_credential(status, &body_text) {
                // Force re-resolution so the engine's terminal failure is
                // not repeated from a stale cache on the next run
                self.tokens.invalidate().await;
                return Err(GoogleError::Auth(format!(
                    "{context}: credential rejected ({status}): {}",
                    truncate(&body_text, 200)
                )));
            }

            return Err(match status {
                StatusCode::NOT_FOUND | StatusCode::GONE => {
                    GoogleError::NotFound(format!("{context}: HTTP {status}"))
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    GoogleError::Auth(format!("{context}: HTTP {status}"))
                }
                _ => GoogleError::Protocol(format!(
                    "{context}: HTTP {status}: {}",
                    truncate(&body_text, 200)
                )),
            });
        }

        Err(GoogleError::Protocol(format!(
            "{context}: retries exhausted"
        )))
    }

    async fn pace(&self) {
        if self.config.rate_limit_delay_ms > 0 {
            sleep(Duration::from_millis(self.config.rate_limit_delay_ms)).await;
        }
    }

    fn decode_events(&self, items: Vec<EventResource>) -> Vec<GoogleEvent> {
        let mut events = Vec::with_capacity(items.len());
        for item in items {
            let event = item.into_event();
            match event.validate() {
                Ok(()) => events.push(event),
                Err(e) => warn!(error = %e, "skipping invalid google event"),
            }
        }
        events
    }
}

fn is_revoked_credential(status: StatusCode, body: &str) -> bool {
    if status != StatusCode::UNAUTHORIZED && status != StatusCode::BAD_REQUEST {
        return false;
    }
    let lowered = body.to_ascii_lowercase();
    lowered.contains("invalid_grant")
        || lowered.contains("token has been expired or revoked")
        || lowered.contains("invalid credentials")
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl GoogleAdapter for GoogleCalendarClient {
    async fn list_calendars(&self) -> Result<Vec<GoogleCalendarInfo>, GoogleError> {
        let url = self.url(&["users", "me", "calendarList"])?;
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![(
                "maxResults",
                self.config.max_results_per_request.to_string(),
            )];
            if let Some(token) = page_token.as_ref() {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .execute_with_retry("calendar list", Method::GET, url.clone(), &query, None)
                .await?;
            let page: CalendarListResponse = response
                .json()
                .await
                .map_err(|e| GoogleError::Protocol(format!("malformed calendar list: {e}")))?;

            calendars.extend(page.items.into_iter().map(|entry| GoogleCalendarInfo {
                summary: entry.summary.unwrap_or_else(|| entry.id.clone()),
                id: entry.id,
                description: entry.description,
                timezone: entry.time_zone,
                primary: entry.primary.unwrap_or(false),
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(count = calendars.len(), "listed google calendars");
        Ok(calendars)
    }

    async fn get_calendar(
        &self,
        calendar_id: &str,
    ) -> Result<Option<GoogleCalendarInfo>, GoogleError> {
        let url = self.url(&["users", "me", "calendarList", calendar_id])?;

        match self
            .execute_with_retry("calendar get", Method::GET, url, &[], None)
            .await
        {
            Ok(response) => {
                let entry: crate::google::wire::CalendarListEntry = response
                    .json()
                    .await
                    .map_err(|e| GoogleError::Protocol(format!("malformed calendar: {e}")))?;
                Ok(Some(GoogleCalendarInfo {
                    summary: entry.summary.unwrap_or_else(|| entry.id.clone()),
                    id: entry.id,
                    description: entry.description,
                    timezone: entry.time_zone,
                    primary: entry.primary.unwrap_or(false),
                }))
            }
            Err(GoogleError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_events(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GoogleEvent>, GoogleError> {
        let url = self.url(&["calendars", calendar_id, "events"])?;
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", rfc3339(start)),
                ("timeMax", rfc3339(end)),
                // Expanded instances are required for correct diffing
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                (
                    "maxResults",
                    self.config.max_results_per_request.to_string(),
                ),
            ];
            if let Some(token) = page_token.as_ref() {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .execute_with_retry("event fetch", Method::GET, url.clone(), &query, None)
                .await?;
            let page: EventListResponse = response
                .json()
                .await
                .map_err(|e| GoogleError::Protocol(format!("malformed event list: {e}")))?;

            events.extend(self.decode_events(page.items));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            calendar_id,
            count = events.len(),
            window_start = %start,
            window_end = %end,
            "fetched google events"
        );
        Ok(events)
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, GoogleError> {
        let url = self.url(&["calendars", calendar_id, "events"])?;
        let body = EventResource::from_event(event);

        let response = self
            .execute_with_retry("event create", Method::POST, url, &[], Some(&body))
            .await?;
        let created: EventResource = response
            .json()
            .await
            .map_err(|e| GoogleError::Protocol(format!("malformed created event: {e}")))?;
        let created = created.into_event();

        info!(event_id = ?created.id, calendar_id, "created google event");
        Ok(created)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, GoogleError> {
        let event_id = event
            .id
            .as_deref()
            .ok_or_else(|| GoogleError::Protocol("event id is required for update".to_string()))?;

        let url = self.url(&["calendars", calendar_id, "events", event_id])?;
        let body = EventResource::from_event(event);

        let response = self
            .execute_with_retry("event update", Method::PUT, url, &[], Some(&body))
            .await?;
        let updated: EventResource = response
            .json()
            .await
            .map_err(|e| GoogleError::Protocol(format!("malformed updated event: {e}")))?;
        let updated = updated.into_event();

        info!(event_id, calendar_id, "updated google event");
        Ok(updated)
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), GoogleError> {
        let url = self.url(&["calendars", calendar_id, "events", event_id])?;

        match self
            .execute_with_retry("event delete", Method::DELETE, url, &[], None)
            .await
        {
            Ok(_) => {
                info!(event_id, calendar_id, "deleted google event");
                Ok(())
            }
            // Idempotent delete: already gone counts as success
            Err(GoogleError::NotFound(_)) => {
                warn!(event_id, calendar_id, "event already absent on delete");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn find_events_by_uid(
        &self,
        calendar_id: &str,
        ical_uid: &str,
    ) -> Result<Vec<GoogleEvent>, GoogleError> {
        let url = self.url(&["calendars", calendar_id, "events"])?;
        let query = vec![
            ("iCalUID", ical_uid.to_string()),
            (
                "maxResults",
                self.config.max_results_per_request.to_string(),
            ),
        ];

        let response = self
            .execute_with_retry("uid lookup", Method::GET, url, &query, None)
            .await?;
        let page: EventListResponse = response
            .json()
            .await
            .map_err(|e| GoogleError::Protocol(format!("malformed event list: {e}")))?;

        Ok(self.decode_events(page.items))
    }
}
