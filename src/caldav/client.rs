//! CalDAV client over reqwest.
//!
//! HTTP Basic over TLS by default; certificate verification can be switched
//! off per account for self-hosted servers. All URLs are resolved relative
//! to the account's base URL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::caldav::ical::{event_to_ical, parse_events};
use crate::caldav::xml::{
    calendar_query_body, parse_calendar_data_multistatus, parse_calendar_multistatus,
    propfind_calendars_body, uid_query_body,
};
use crate::caldav::{CalDavAdapter, CalDavSession, CalendarInfo};
use crate::config::CalDavConfig;
use crate::error::CalDavError;
use crate::event::CalDavEvent;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const ICAL_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

pub struct HttpCalDavClient {
    verified: Client,
    unverified: Client,
}

impl HttpCalDavClient {
    pub fn new(config: &CalDavConfig) -> Result<Self, CalDavError> {
        let build = |verify_tls: bool| {
            Client::builder()
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .timeout(Duration::from_secs(config.read_timeout_secs))
                .danger_accept_invalid_certs(!verify_tls)
                .build()
                .map_err(|e| CalDavError::Connection(format!("client setup failed: {e}")))
        };

        Ok(Self {
            verified: build(true)?,
            unverified: build(false)?,
        })
    }

    fn http(&self, session: &CalDavSession) -> &Client {
        if session.verify_tls {
            &self.verified
        } else {
            &self.unverified
        }
    }

    fn resolve(session: &CalDavSession, path: &str) -> Result<Url, CalDavError> {
        let base = Url::parse(&session.base_url)
            .map_err(|e| CalDavError::Protocol(format!("invalid base URL: {e}")))?;
        base.join(path)
            .map_err(|e| CalDavError::Protocol(format!("invalid resource path {path}: {e}")))
    }

    fn calendar_url(session: &CalDavSession, calendar_id: &str) -> Result<Url, CalDavError> {
        let mut path = calendar_id.to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        Self::resolve(session, &path)
    }

    async fn send(
        &self,
        session: &CalDavSession,
        method: Method,
        url: Url,
        depth: Option<&str>,
        content_type: Option<&str>,
        body: Option<String>,
    ) -> Result<reqwest::Response, CalDavError> {
        let mut request = self
            .http(session)
            .request(method, url)
            .basic_auth(&session.username, Some(session.password.as_str()));

        if let Some(depth) = depth {
            request = request.header("Depth", depth);
        }
        if let Some(content_type) = content_type {
            request = request.header("Content-Type", content_type);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }

    fn report_method() -> Method {
        Method::from_bytes(b"REPORT").unwrap_or(Method::GET)
    }

    fn propfind_method() -> Method {
        Method::from_bytes(b"PROPFIND").unwrap_or(Method::GET)
    }

    /// Locate the resource href holding the event with the given UID.
    async fn find_event_href(
        &self,
        session: &CalDavSession,
        calendar_id: &str,
        uid: &str,
    ) -> Result<Option<String>, CalDavError> {
        let url = Self::calendar_url(session, calendar_id)?;
        let body = uid_query_body(uid)?;

        let response = self
            .send(
                session,
                Self::report_method(),
                url,
                Some("1"),
                Some(XML_CONTENT_TYPE),
                Some(body),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalDavError::from_status(status, "uid lookup"));
        }

        let text = response.text().await?;
        let resources = parse_calendar_data_multistatus(&text)?;

        Ok(resources.into_iter().next().map(|r| r.href))
    }
}

#[async_trait]
impl CalDavAdapter for HttpCalDavClient {
    async fn test_connection(&self, session: &CalDavSession) -> Result<(), CalDavError> {
        let url = Self::resolve(session, "")?;
        let body = propfind_calendars_body()?;

        let response = self
            .send(
                session,
                Self::propfind_method(),
                url,
                Some("0"),
                Some(XML_CONTENT_TYPE),
                Some(body),
            )
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(account = %session.username, "caldav connection test succeeded");
            Ok(())
        } else {
            Err(CalDavError::from_status(status, "connection test"))
        }
    }

    async fn discover_calendars(
        &self,
        session: &CalDavSession,
    ) -> Result<Vec<CalendarInfo>, CalDavError> {
        let url = Self::resolve(session, "")?;
        let body = propfind_calendars_body()?;

        let response = self
            .send(
                session,
                Self::propfind_method(),
                url,
                Some("1"),
                Some(XML_CONTENT_TYPE),
                Some(body),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalDavError::from_status(status, "calendar discovery"));
        }

        let text = response.text().await?;
        let calendars: Vec<CalendarInfo> = parse_calendar_multistatus(&text)?
            .into_iter()
            .filter(|props| props.is_calendar && !props.href.is_empty())
            .map(|props| {
                let id = props.href.trim_end_matches('/').to_string();
                let name = props.display_name.clone().unwrap_or_else(|| {
                    id.rsplit('/').next().unwrap_or("Unnamed calendar").to_string()
                });
                let url = Self::resolve(session, &props.href)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| props.href.clone());
                CalendarInfo {
                    id,
                    name,
                    color: props.color,
                    timezone: props.timezone,
                    url,
                }
            })
            .collect();

        info!(count = calendars.len(), "discovered caldav calendars");
        Ok(calendars)
    }

    async fn get_events(
        &self,
        session: &CalDavSession,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalDavEvent>, CalDavError> {
        let url = Self::calendar_url(session, calendar_id)?;
        let body = calendar_query_body(start, end)?;

        let response = self
            .send(
                session,
                Self::report_method(),
                url,
                Some("1"),
                Some(XML_CONTENT_TYPE),
                Some(body),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalDavError::from_status(status, "event fetch"));
        }

        let text = response.text().await?;
        let resources = parse_calendar_data_multistatus(&text)?;

        let mut events = Vec::new();
        for resource in resources {
            match parse_events(&resource.calendar_data) {
                Ok(parsed) => events.extend(parsed),
                Err(e) => {
                    warn!(href = %resource.href, error = %e, "skipping unparseable event resource");
                }
            }
        }

        debug!(
            calendar_id,
            count = events.len(),
            window_start = %start,
            window_end = %end,
            "fetched caldav events"
        );
        Ok(events)
    }

    async fn create_event(
        &self,
        session: &CalDavSession,
        calendar_id: &str,
        event: &CalDavEvent,
    ) -> Result<(), CalDavError> {
        let calendar_url = Self::calendar_url(session, calendar_id)?;
        let url = calendar_url
            .join(&event_filename(event))
            .map_err(|e| CalDavError::Protocol(format!("invalid event URL: {e}")))?;

        let response = self
            .send(
                session,
                Method::PUT,
                url,
                None,
                Some(ICAL_CONTENT_TYPE),
                Some(event_to_ical(event)),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalDavError::from_status(status, "event create"));
        }

        info!(uid = %event.uid, calendar_id, "created caldav event");
        Ok(())
    }

    async fn update_event(
        &self,
        session: &CalDavSession,
        calendar_id: &str,
        event: &CalDavEvent,
    ) -> Result<(), CalDavError> {
        let href = self
            .find_event_href(session, calendar_id, &event.uid)
            .await?
            .ok_or_else(|| {
                CalDavError::NotFound(format!("event {} not found for update", event.uid))
            })?;

        let url = Self::resolve(session, &href)?;
        let response = self
            .send(
                session,
                Method::PUT,
                url,
                None,
                Some(ICAL_CONTENT_TYPE),
                Some(event_to_ical(event)),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalDavError::from_status(status, "event update"));
        }

        info!(uid = %event.uid, calendar_id, "updated caldav event");
        Ok(())
    }

    async fn delete_event(
        &self,
        session: &CalDavSession,
        calendar_id: &str,
        uid: &str,
    ) -> Result<(), CalDavError> {
        let Some(href) = self.find_event_href(session, calendar_id, uid).await? else {
            warn!(uid, calendar_id, "event already absent, delete is a no-op");
            return Ok(());
        };

        let url = Self::resolve(session, &href)?;
        let response = self
            .send(session, Method::DELETE, url, None, None, None)
            .await?;

        let status = response.status();
        // Idempotent delete: a resource gone between lookup and delete is fine
        if status.is_success()
            || status == StatusCode::NOT_FOUND
            || status == StatusCode::GONE
        {
            info!(uid, calendar_id, "deleted caldav event");
            Ok(())
        } else {
            Err(CalDavError::from_status(status, "event delete"))
        }
    }
}

/// Resource filename for a new event. UIDs can contain characters that do
/// not survive a URL path segment, so they are replaced.
fn event_filename(event: &CalDavEvent) -> String {
    let mut name: String = event
        .uid
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if let Some(ref instance) = event.recurrence_instance_id {
        name.push('-');
        name.extend(instance.chars().filter(char::is_ascii_alphanumeric));
    }

    format!("{name}.ics")
}
