//! Shared fixtures for integration tests: in-memory database setup, fake
//! adapters, a pinned clock and row insertion helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;
use zeroize::Zeroizing;

use caldav_sync::caldav::{CalDavAdapter, CalDavSession, CalendarInfo};
use caldav_sync::config::WebhookConfig;
use caldav_sync::crypto::CryptoKey;
use caldav_sync::error::{CalDavError, GoogleError};
use caldav_sync::event::{CalDavEvent, EventStatus, GoogleEvent, SyncDirection};
use caldav_sync::google::{AccessTokenProvider, GoogleAdapter, GoogleCalendarInfo};
use caldav_sync::models::mapping;
use caldav_sync::repositories::account::AccountRepository;
use caldav_sync::repositories::sync_log::SyncLogRepository;
use caldav_sync::repositories::webhook_retry::WebhookRetryRepository;
use caldav_sync::sync::clock::Clock;
use caldav_sync::sync::engine::SyncEngine;
use caldav_sync::sync::webhook::WebhookPipeline;
use migration::{Migrator, MigratorTrait};

pub async fn setup_test_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("create in-memory database");
    Migrator::up(&db, None).await.expect("apply migrations");
    Arc::new(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).expect("valid test key")
}

/// Clock pinned to 2025-01-15; window starts at midnight UTC.
pub struct FixedClock {
    pub now: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
}

impl FixedClock {
    pub fn new() -> Self {
        Self {
            now: Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
            window_start: Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap(),
        }
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.now
    }

    fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }
}

/// Token provider that yields a static token or a configured auth failure.
pub struct StaticTokenProvider {
    pub fail: AtomicBool,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<Zeroizing<String>, GoogleError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(GoogleError::Auth("invalid_grant: token revoked".to_string()))
        } else {
            Ok(Zeroizing::new("test-token".to_string()))
        }
    }

    async fn invalidate(&self) {}
}

/// In-memory CalDAV side with call recording.
#[derive(Default)]
pub struct FakeCalDav {
    pub events: Mutex<Vec<CalDavEvent>>,
    pub created: Mutex<Vec<CalDavEvent>>,
    pub updated: Mutex<Vec<CalDavEvent>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_fetch: AtomicBool,
    /// When set, the Nth write call (0-based) and everything after it fail
    /// with an auth error.
    auth_fail_after_writes: Mutex<Option<usize>>,
    writes: AtomicUsize,
}

impl FakeCalDav {
    pub fn with_events(events: Vec<CalDavEvent>) -> Arc<Self> {
        let fake = Self::default();
        *fake.events.lock().unwrap() = events;
        Arc::new(fake)
    }

    pub fn fail_writes_with_auth_after(&self, successes: usize) {
        *self.auth_fail_after_writes.lock().unwrap() = Some(successes);
    }

    fn check_write(&self) -> Result<(), CalDavError> {
        let call = self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.auth_fail_after_writes.lock().unwrap()
            && call >= limit
        {
            return Err(CalDavError::Auth("401 unauthorized".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CalDavAdapter for FakeCalDav {
    async fn test_connection(&self, _session: &CalDavSession) -> Result<(), CalDavError> {
        Ok(())
    }

    async fn discover_calendars(
        &self,
        _session: &CalDavSession,
    ) -> Result<Vec<CalendarInfo>, CalDavError> {
        Ok(Vec::new())
    }

    async fn get_events(
        &self,
        _session: &CalDavSession,
        _calendar_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<CalDavEvent>, CalDavError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(CalDavError::Connection("fetch refused".to_string()));
        }
        Ok(self.events.lock().unwrap().clone())
    }

    async fn create_event(
        &self,
        _session: &CalDavSession,
        _calendar_id: &str,
        event: &CalDavEvent,
    ) -> Result<(), CalDavError> {
        self.check_write()?;
        self.created.lock().unwrap().push(event.clone());
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn update_event(
        &self,
        _session: &CalDavSession,
        _calendar_id: &str,
        event: &CalDavEvent,
    ) -> Result<(), CalDavError> {
        self.check_write()?;
        self.updated.lock().unwrap().push(event.clone());
        let mut events = self.events.lock().unwrap();
        if let Some(existing) = events.iter_mut().find(|e| e.uid == event.uid) {
            *existing = event.clone();
        }
        Ok(())
    }

    async fn delete_event(
        &self,
        _session: &CalDavSession,
        _calendar_id: &str,
        uid: &str,
    ) -> Result<(), CalDavError> {
        self.check_write()?;
        self.deleted.lock().unwrap().push(uid.to_string());
        self.events.lock().unwrap().retain(|e| e.uid != uid);
        Ok(())
    }
}

/// In-memory Google side. Created events get sequential ids and a fixed
/// `updated` timestamp.
#[derive(Default)]
pub struct FakeGoogle {
    pub events: Mutex<Vec<GoogleEvent>>,
    pub created: Mutex<Vec<GoogleEvent>>,
    pub updated_calls: Mutex<Vec<GoogleEvent>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_fetch_with_auth: AtomicBool,
    /// When set, the Nth write call (0-based) and everything after it fail
    /// with an auth error, mimicking a token revoked mid-run.
    auth_fail_after_writes: Mutex<Option<usize>>,
    writes: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeGoogle {
    pub fn with_events(events: Vec<GoogleEvent>) -> Arc<Self> {
        let fake = Self::default();
        *fake.events.lock().unwrap() = events;
        Arc::new(fake)
    }

    pub fn fail_writes_with_auth_after(&self, successes: usize) {
        *self.auth_fail_after_writes.lock().unwrap() = Some(successes);
    }

    fn check_write(&self) -> Result<(), GoogleError> {
        let call = self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.auth_fail_after_writes.lock().unwrap()
            && call >= limit
        {
            return Err(GoogleError::Auth("invalid_grant: token revoked".to_string()));
        }
        Ok(())
    }

    fn server_updated() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 1).unwrap()
    }
}

#[async_trait]
impl GoogleAdapter for FakeGoogle {
    async fn list_calendars(&self) -> Result<Vec<GoogleCalendarInfo>, GoogleError> {
        Ok(Vec::new())
    }

    async fn get_calendar(
        &self,
        _calendar_id: &str,
    ) -> Result<Option<GoogleCalendarInfo>, GoogleError> {
        Ok(None)
    }

    async fn get_events(
        &self,
        _calendar_id: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<GoogleEvent>, GoogleError> {
        if self.fail_fetch_with_auth.load(Ordering::SeqCst) {
            return Err(GoogleError::Auth("invalid_grant".to_string()));
        }
        Ok(self.events.lock().unwrap().clone())
    }

    async fn create_event(
        &self,
        _calendar_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, GoogleError> {
        self.check_write()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = event.clone();
        stored.id = Some(format!("g-{id}"));
        stored.updated = Some(Self::server_updated());

        self.created.lock().unwrap().push(stored.clone());
        self.events.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn update_event(
        &self,
        _calendar_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, GoogleError> {
        self.check_write()?;
        let mut stored = event.clone();
        stored.updated = Some(Self::server_updated());

        self.updated_calls.lock().unwrap().push(stored.clone());
        let mut events = self.events.lock().unwrap();
        if let Some(existing) = events.iter_mut().find(|e| e.id == stored.id) {
            *existing = stored.clone();
        }
        Ok(stored)
    }

    async fn delete_event(&self, _calendar_id: &str, event_id: &str) -> Result<(), GoogleError> {
        self.check_write()?;
        self.deleted.lock().unwrap().push(event_id.to_string());
        self.events
            .lock()
            .unwrap()
            .retain(|e| e.id.as_deref() != Some(event_id));
        Ok(())
    }

    async fn find_events_by_uid(
        &self,
        _calendar_id: &str,
        ical_uid: &str,
    ) -> Result<Vec<GoogleEvent>, GoogleError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.ical_uid.as_deref() == Some(ical_uid))
            .cloned()
            .collect())
    }
}

/// Full engine wired from fakes against an in-memory database.
pub struct TestHarness {
    pub db: Arc<DatabaseConnection>,
    pub engine: Arc<SyncEngine>,
    pub pipeline: Arc<WebhookPipeline>,
    pub caldav: Arc<FakeCalDav>,
    pub google: Arc<FakeGoogle>,
    pub tokens: Arc<StaticTokenProvider>,
    pub account_id: Uuid,
}

pub async fn setup_harness(caldav: Arc<FakeCalDav>, google: Arc<FakeGoogle>) -> TestHarness {
    let db = setup_test_db().await;
    let key = test_crypto_key();

    let accounts = AccountRepository::new(db.clone(), key.clone());
    let account = accounts
        .create(
            "test account",
            "caluser",
            "calpass",
            "https://caldav.example.test/dav/",
            true,
        )
        .await
        .expect("insert account");

    let tokens = Arc::new(StaticTokenProvider::new());
    let clock = Arc::new(FixedClock::new());

    let pipeline = Arc::new(WebhookPipeline::new(
        WebhookConfig::default(),
        clock.clone(),
        SyncLogRepository::new(db.clone()),
        WebhookRetryRepository::new(db.clone()),
    ));

    let engine = Arc::new(SyncEngine::new(
        caldav.clone(),
        google.clone(),
        tokens.clone(),
        pipeline.clone(),
        clock,
        db.clone(),
        accounts,
    ));

    TestHarness {
        db,
        engine,
        pipeline,
        caldav,
        google,
        tokens,
        account_id: account.id,
    }
}

pub async fn insert_mapping(
    db: &DatabaseConnection,
    account_id: Uuid,
    direction: SyncDirection,
    webhook_url: Option<&str>,
) -> mapping::Model {
    let now = Utc::now();
    let model = mapping::ActiveModel {
        id: Set(Uuid::new_v4()),
        caldav_account_id: Set(account_id),
        caldav_calendar_id: Set("/calendars/user/work".to_string()),
        caldav_calendar_name: Set("Work".to_string()),
        google_calendar_id: Set("primary".to_string()),
        google_calendar_name: Set("Primary".to_string()),
        sync_direction: Set(direction.as_str().to_string()),
        sync_window_days: Set(30),
        sync_interval_minutes: Set(5),
        webhook_url: Set(webhook_url.map(str::to_string)),
        enabled: Set(true),
        last_sync_at: Set(None),
        last_sync_status: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    model.insert(db).await.expect("insert mapping")
}

pub fn caldav_event(uid: &str, summary: &str, modified_hour: u32) -> CalDavEvent {
    CalDavEvent {
        uid: uid.to_string(),
        summary: summary.to_string(),
        description: None,
        location: None,
        start: Some(Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()),
        end: Some(Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()),
        all_day: false,
        timezone: Some("UTC".to_string()),
        rrule: None,
        recurrence_instance_id: None,
        last_modified: Some(
            Utc.with_ymd_and_hms(2025, 1, 15, modified_hour, 0, 0).unwrap(),
        ),
        created: None,
        sequence: 0,
        status: EventStatus::Confirmed,
    }
}

pub fn google_event(uid: &str, id: &str, summary: &str, updated_hour: u32) -> GoogleEvent {
    GoogleEvent {
        id: Some(id.to_string()),
        ical_uid: Some(uid.to_string()),
        summary: summary.to_string(),
        description: None,
        location: None,
        start: Some(Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()),
        end: Some(Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()),
        all_day: false,
        timezone: Some("UTC".to_string()),
        recurrence: None,
        recurrence_instance_id: None,
        updated: Some(Utc.with_ymd_and_hms(2025, 1, 15, updated_hour, 0, 0).unwrap()),
        created: None,
        sequence: 0,
        status: EventStatus::Confirmed,
    }
}
