//! Per-mapping sync orchestrator.
//!
//! One run: open the sync log, resolve credentials, fetch the window from
//! both sides, diff, apply changes in a stable order, persist event mappings
//! as it goes, finalize the log together with the mapping's last-sync fields,
//! then hand the result to the webhook pipeline.
//!
//! Per-change failures never poison the rest of the run; only the global
//! prerequisites (mapping, credentials, window fetch) abort it.

use chrono::Duration;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::caldav::{CalDavAdapter, CalDavSession};
use crate::error::{CalDavError, GoogleError, SyncRunError};
use crate::event::SyncDirection;
use crate::google::{AccessTokenProvider, GoogleAdapter};
use crate::models::mapping::Model as MappingModel;
use crate::repositories::RepoError;
use crate::repositories::account::AccountRepository;
use crate::repositories::event_mapping::{EventMappingRepository, EventMappingUpdate};
use crate::repositories::mapping::MappingRepository;
use crate::repositories::sync_log::{SyncLogFinalize, SyncLogRepository};
use crate::sync::clock::Clock;
use crate::sync::differ::{ChangeAction, ConflictResolution, EventChange, EventDiffer};
use crate::sync::normalizer;
use crate::sync::webhook::WebhookPipeline;

/// Terminal status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failure,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failure => "failure",
        }
    }
}

/// Result of one sync run.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub mapping_id: Uuid,
    pub sync_log_id: Uuid,
    pub direction: SyncDirection,
    pub status: SyncStatus,
    pub inserted: i32,
    pub updated: i32,
    pub deleted: i32,
    pub errors: i32,
    pub error_messages: Vec<String>,
    pub event_summaries: Vec<String>,
    pub change_summary: Option<String>,
    pub duration_seconds: i64,
}

/// Mutable run state threaded through the apply phase.
#[derive(Debug, Default)]
struct RunCounters {
    inserted: i32,
    updated: i32,
    deleted: i32,
    errors: i32,
    error_messages: Vec<String>,
    event_summaries: Vec<String>,
    cancelled: bool,
    /// A credential was rejected mid-apply; the run is terminal regardless
    /// of how many changes already landed.
    auth_failed: bool,
}

/// What a successfully applied change did.
enum Applied {
    Inserted(String),
    Updated(String),
    Deleted,
    /// Orphaned tracking row dropped; no adapter mutation, no counter.
    RowDropped,
}

impl RunCounters {
    fn record_error(&mut self, sync_uid: &str, error: impl std::fmt::Display) {
        self.errors += 1;
        self.error_messages
            .push(format!("failed to apply change for {sync_uid}: {error}"));
    }

    fn record_applied(&mut self, applied: Applied) {
        match applied {
            Applied::Inserted(title) => {
                self.inserted += 1;
                self.record_summary(&title);
            }
            Applied::Updated(title) => {
                self.updated += 1;
                self.record_summary(&title);
            }
            Applied::Deleted => {
                self.deleted += 1;
                self.event_summaries.push("(deleted event)".to_string());
            }
            Applied::RowDropped => {}
        }
    }

    fn record_summary(&mut self, summary: &str) {
        if !summary.is_empty() {
            self.event_summaries.push(summary.to_string());
        }
    }
}

pub struct SyncEngine {
    caldav: Arc<dyn CalDavAdapter>,
    google: Arc<dyn GoogleAdapter>,
    tokens: Arc<dyn AccessTokenProvider>,
    webhooks: Arc<WebhookPipeline>,
    clock: Arc<dyn Clock>,
    accounts: AccountRepository,
    mappings: MappingRepository,
    event_mappings: EventMappingRepository,
    sync_logs: SyncLogRepository,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        caldav: Arc<dyn CalDavAdapter>,
        google: Arc<dyn GoogleAdapter>,
        tokens: Arc<dyn AccessTokenProvider>,
        webhooks: Arc<WebhookPipeline>,
        clock: Arc<dyn Clock>,
        db: Arc<DatabaseConnection>,
        accounts: AccountRepository,
    ) -> Self {
        Self {
            caldav,
            google,
            tokens,
            webhooks,
            clock,
            accounts,
            mappings: MappingRepository::new(db.clone()),
            event_mappings: EventMappingRepository::new(db.clone()),
            sync_logs: SyncLogRepository::new(db),
        }
    }

    /// Execute one sync run for a mapping.
    ///
    /// Errors are only returned when the run could not be opened at all (no
    /// mapping, no log row). Once the log row exists every failure finalizes
    /// it and comes back as a `SyncResult` with `Failure` status.
    #[instrument(skip(self, cancel), fields(mapping_id = %mapping_id))]
    pub async fn sync(
        &self,
        mapping_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, SyncRunError> {
        let mapping = self
            .mappings
            .require(mapping_id)
            .await
            .map_err(|e| SyncRunError::Mapping(e.to_string()))?;

        let direction = mapping
            .direction()
            .ok_or_else(|| SyncRunError::Mapping(format!(
                "unknown sync direction '{}'",
                mapping.sync_direction
            )))?;

        let started_at = self.clock.now_utc();
        let sync_log = self
            .sync_logs
            .open_running(mapping.id, direction, started_at)
            .await?;

        info!(
            caldav_calendar = %mapping.caldav_calendar_name,
            google_calendar = %mapping.google_calendar_name,
            direction = %direction,
            "sync run started"
        );

        let mut counters = RunCounters::default();
        let run = self
            .run_inner(&mapping, direction, cancel, &mut counters)
            .await;

        if let Err(ref e) = run {
            counters.errors += 1;
            counters.error_messages.push(e.to_string());
        }
        if counters.cancelled {
            counters.error_messages.push("cancelled".to_string());
        }

        let applied = counters.inserted + counters.updated + counters.deleted;
        let status = if run.is_err() || counters.cancelled || counters.auth_failed {
            SyncStatus::Failure
        } else if counters.errors == 0 {
            SyncStatus::Success
        } else if applied > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failure
        };

        let completed_at = self.clock.now_utc();
        let duration_seconds = (completed_at - started_at).num_seconds();
        let change_summary = change_summary(&counters.event_summaries);
        let error_message = if counters.error_messages.is_empty() {
            None
        } else {
            Some(counters.error_messages.join("; "))
        };

        self.sync_logs
            .finalize(
                sync_log.id,
                mapping.id,
                SyncLogFinalize {
                    status: status.as_str(),
                    inserted: counters.inserted,
                    updated: counters.updated,
                    deleted: counters.deleted,
                    errors: counters.errors,
                    error_message,
                    event_summaries: &counters.event_summaries,
                    change_summary: change_summary.clone(),
                    completed_at,
                    duration_seconds,
                },
            )
            .await?;

        info!(
            status = status.as_str(),
            inserted = counters.inserted,
            updated = counters.updated,
            deleted = counters.deleted,
            errors = counters.errors,
            duration_seconds,
            "sync run finished"
        );

        let labels = vec![("status", status.as_str().to_string())];
        counter!("sync_runs_total", &labels).increment(1);
        histogram!("sync_run_duration_seconds").record(duration_seconds as f64);

        // Delivery failures must not disturb the log's primary status
        if let Some(log) = self.sync_logs.get(sync_log.id).await? {
            let delivered = self.webhooks.send_sync_result(&mapping, &log).await;
            if !delivered {
                warn!(mapping_id = %mapping.id, "webhook delivery failed, queued for retry");
            }
        }

        Ok(SyncResult {
            mapping_id: mapping.id,
            sync_log_id: sync_log.id,
            direction,
            status,
            inserted: counters.inserted,
            updated: counters.updated,
            deleted: counters.deleted,
            errors: counters.errors,
            error_messages: counters.error_messages,
            event_summaries: counters.event_summaries,
            change_summary,
            duration_seconds,
        })
    }

    /// Steps 2-6: credentials, fetch, diff, apply.
    async fn run_inner(
        &self,
        mapping: &MappingModel,
        direction: SyncDirection,
        cancel: &CancellationToken,
        counters: &mut RunCounters,
    ) -> Result<(), SyncRunError> {
        // CalDAV credential: account row plus decrypted password
        let credentials = self
            .accounts
            .load_credentials(mapping.caldav_account_id)
            .await
            .map_err(|e| match e {
                RepoError::NotFound(what) => SyncRunError::Mapping(format!("{what} missing")),
                other => SyncRunError::Credential(other.to_string()),
            })?;

        if !credentials.account.enabled {
            return Err(SyncRunError::Mapping(format!(
                "caldav account {} is disabled",
                credentials.account.name
            )));
        }
        let session = CalDavSession::from(credentials);

        // Google credential: the provider refreshes or fails
        self.tokens
            .access_token()
            .await
            .map_err(SyncRunError::Google)?;

        // Fetch window; CalDAV first to keep traces deterministic
        let window_start = self.clock.window_start();
        let window_end = window_start + Duration::days(i64::from(mapping.sync_window_days));

        let caldav_events = self
            .caldav
            .get_events(
                &session,
                &mapping.caldav_calendar_id,
                window_start,
                window_end,
            )
            .await?;

        if cancel.is_cancelled() {
            counters.cancelled = true;
            return Ok(());
        }

        let google_events = self
            .google
            .get_events(&mapping.google_calendar_id, window_start, window_end)
            .await?;

        if cancel.is_cancelled() {
            counters.cancelled = true;
            return Ok(());
        }

        let persisted = self.event_mappings.list_for_mapping(mapping.id).await?;
        let differ = EventDiffer::new(mapping.id);

        match direction {
            SyncDirection::Bidirectional => {
                let mut changes =
                    differ.analyze_bidirectional(&caldav_events, &google_events, &persisted);
                let conflicts = std::mem::take(&mut changes.conflicts);
                for conflict in conflicts {
                    match conflict.resolution {
                        Some(ConflictResolution::GoogleWins) => changes.to_caldav.push(conflict),
                        _ => changes.to_google.push(conflict),
                    }
                }

                self.apply_to_google(mapping, &session, changes.to_google, cancel, counters)
                    .await;
                self.apply_to_caldav(mapping, &session, changes.to_caldav, cancel, counters)
                    .await;
            }
            SyncDirection::CaldavToGoogle => {
                let changes = differ.analyze_unidirectional(
                    &caldav_events,
                    &google_events,
                    &persisted,
                    direction,
                );
                self.apply_to_google(mapping, &session, changes, cancel, counters)
                    .await;
            }
            SyncDirection::GoogleToCaldav => {
                let changes = differ.analyze_unidirectional(
                    &caldav_events,
                    &google_events,
                    &persisted,
                    direction,
                );
                self.apply_to_caldav(mapping, &session, changes, cancel, counters)
                    .await;
            }
        }

        Ok(())
    }

    /// Apply changes whose target is Google Calendar.
    async fn apply_to_google(
        &self,
        mapping: &MappingModel,
        session: &CalDavSession,
        changes: Vec<EventChange>,
        cancel: &CancellationToken,
        counters: &mut RunCounters,
    ) {
        for change in stable_order(changes) {
            if counters.cancelled || counters.auth_failed {
                return;
            }
            if cancel.is_cancelled() {
                counters.cancelled = true;
                return;
            }

            match self.apply_one_to_google(mapping, session, &change).await {
                Ok(applied) => counters.record_applied(applied),
                Err(e) => {
                    error!(sync_uid = %change.sync_uid, error = %e, "change failed");
                    let is_auth = e.is_auth();
                    counters.record_error(&change.sync_uid, e);
                    // A rejected credential poisons every remaining change;
                    // abort instead of failing them one by one
                    if is_auth {
                        warn!(sync_uid = %change.sync_uid, "credential rejected mid-apply, aborting run");
                        counters.auth_failed = true;
                        return;
                    }
                }
            }
        }
    }

    async fn apply_one_to_google(
        &self,
        mapping: &MappingModel,
        _session: &CalDavSession,
        change: &EventChange,
    ) -> Result<Applied, ApplyError> {
        match change.action {
            ChangeAction::Insert | ChangeAction::Update => {
                let caldav_event = change
                    .caldav_event
                    .as_ref()
                    .ok_or_else(|| ApplyError::Data("change carries no caldav event".into()))?;

                let mut google_event = normalizer::caldav_to_google(caldav_event);

                let written = if change.action == ChangeAction::Insert {
                    self.google
                        .create_event(&mapping.google_calendar_id, &google_event)
                        .await?
                } else {
                    google_event.id = change
                        .google_event
                        .as_ref()
                        .and_then(|g| g.id.clone())
                        .or_else(|| {
                            change
                                .mapping
                                .as_ref()
                                .and_then(|m| m.google_event_id.clone())
                        });
                    self.google
                        .update_event(&mapping.google_calendar_id, &google_event)
                        .await?
                };

                self.record_apply(
                    mapping.id,
                    &change.sync_uid,
                    written.id.as_deref(),
                    caldav_event.last_modified,
                    written.updated,
                    SyncDirection::CaldavToGoogle,
                    &caldav_event.content_hash(),
                )
                .await?;

                Ok(if change.action == ChangeAction::Insert {
                    Applied::Inserted(caldav_event.summary.clone())
                } else {
                    Applied::Updated(caldav_event.summary.clone())
                })
            }
            ChangeAction::Delete => {
                let Some(persisted) = change.mapping.as_ref() else {
                    return Err(ApplyError::Data("delete change without mapping".into()));
                };

                // Only touch the adapter when Google still has the event;
                // orphans arrive with no event on either side and just drop
                // their tracking row
                let google_id = change
                    .google_event
                    .as_ref()
                    .and_then(|g| g.id.as_deref())
                    .or(persisted.google_event_id.as_deref());

                if change.google_event.is_some()
                    && let Some(google_id) = google_id
                {
                    self.google
                        .delete_event(&mapping.google_calendar_id, google_id)
                        .await?;
                    self.event_mappings.delete(persisted.id).await?;
                    Ok(Applied::Deleted)
                } else {
                    info!(sync_uid = %change.sync_uid, "dropped orphaned event mapping");
                    self.event_mappings.delete(persisted.id).await?;
                    Ok(Applied::RowDropped)
                }
            }
            ChangeAction::NoChange => Ok(Applied::RowDropped),
        }
    }

    /// Apply changes whose target is the CalDAV calendar.
    async fn apply_to_caldav(
        &self,
        mapping: &MappingModel,
        session: &CalDavSession,
        changes: Vec<EventChange>,
        cancel: &CancellationToken,
        counters: &mut RunCounters,
    ) {
        for change in stable_order(changes) {
            if counters.cancelled || counters.auth_failed {
                return;
            }
            if cancel.is_cancelled() {
                counters.cancelled = true;
                return;
            }

            match self.apply_one_to_caldav(mapping, session, &change).await {
                Ok(applied) => counters.record_applied(applied),
                Err(e) => {
                    error!(sync_uid = %change.sync_uid, error = %e, "change failed");
                    let is_auth = e.is_auth();
                    counters.record_error(&change.sync_uid, e);
                    // A rejected credential poisons every remaining change;
                    // abort instead of failing them one by one
                    if is_auth {
                        warn!(sync_uid = %change.sync_uid, "credential rejected mid-apply, aborting run");
                        counters.auth_failed = true;
                        return;
                    }
                }
            }
        }
    }

    async fn apply_one_to_caldav(
        &self,
        mapping: &MappingModel,
        session: &CalDavSession,
        change: &EventChange,
    ) -> Result<Applied, ApplyError> {
        match change.action {
            ChangeAction::Insert | ChangeAction::Update => {
                let google_event = change
                    .google_event
                    .as_ref()
                    .ok_or_else(|| ApplyError::Data("change carries no google event".into()))?;

                let caldav_event = normalizer::google_to_caldav(google_event);

                if change.action == ChangeAction::Insert {
                    self.caldav
                        .create_event(session, &mapping.caldav_calendar_id, &caldav_event)
                        .await?;
                } else {
                    self.caldav
                        .update_event(session, &mapping.caldav_calendar_id, &caldav_event)
                        .await?;
                }

                self.record_apply(
                    mapping.id,
                    &change.sync_uid,
                    google_event.id.as_deref(),
                    caldav_event.last_modified,
                    google_event.updated,
                    SyncDirection::GoogleToCaldav,
                    &google_event.content_hash(),
                )
                .await?;

                Ok(if change.action == ChangeAction::Insert {
                    Applied::Inserted(google_event.summary.clone())
                } else {
                    Applied::Updated(google_event.summary.clone())
                })
            }
            ChangeAction::Delete => {
                let Some(persisted) = change.mapping.as_ref() else {
                    return Err(ApplyError::Data("delete change without mapping".into()));
                };

                if change.caldav_event.is_some() {
                    let uid = raw_uid(&persisted.caldav_uid);
                    self.caldav
                        .delete_event(session, &mapping.caldav_calendar_id, uid)
                        .await?;
                    self.event_mappings.delete(persisted.id).await?;
                    Ok(Applied::Deleted)
                } else {
                    info!(sync_uid = %change.sync_uid, "dropped orphaned event mapping");
                    self.event_mappings.delete(persisted.id).await?;
                    Ok(Applied::RowDropped)
                }
            }
            ChangeAction::NoChange => Ok(Applied::RowDropped),
        }
    }

    /// Upsert the event mapping after a successful adapter call.
    #[allow(clippy::too_many_arguments)]
    async fn record_apply(
        &self,
        mapping_id: Uuid,
        sync_uid: &str,
        google_event_id: Option<&str>,
        last_caldav_modified: Option<chrono::DateTime<chrono::Utc>>,
        last_google_updated: Option<chrono::DateTime<chrono::Utc>>,
        direction: SyncDirection,
        content_hash: &str,
    ) -> Result<(), ApplyError> {
        self.event_mappings
            .upsert(EventMappingUpdate {
                mapping_id,
                caldav_uid: sync_uid,
                google_event_id,
                last_caldav_modified,
                last_google_updated,
                direction,
                content_hash,
            })
            .await?;
        Ok(())
    }
}

/// Per-change failure inside the apply phase.
#[derive(Debug, thiserror::Error)]
enum ApplyError {
    #[error(transparent)]
    CalDav(#[from] CalDavError),
    #[error(transparent)]
    Google(#[from] GoogleError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("{0}")]
    Data(String),
}

impl ApplyError {
    /// Auth failures abort the whole run; everything else is per-change.
    fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::CalDav(CalDavError::Auth(_)) | Self::Google(GoogleError::Auth(_))
        )
    }
}

/// Stable apply order: inserts, then updates, then deletes, each sorted by
/// sync UID, so a retried run produces the same observable sequence.
fn stable_order(changes: Vec<EventChange>) -> Vec<EventChange> {
    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();

    for change in changes {
        match change.action {
            ChangeAction::Insert => inserts.push(change),
            ChangeAction::Update => updates.push(change),
            ChangeAction::Delete => deletes.push(change),
            ChangeAction::NoChange => {}
        }
    }

    for bucket in [&mut inserts, &mut updates, &mut deletes] {
        bucket.sort_by(|a, b| a.sync_uid.cmp(&b.sync_uid));
    }

    inserts
        .into_iter()
        .chain(updates)
        .chain(deletes)
        .collect()
}

/// Strip the instance suffix off a stored sync key to recover the raw UID.
fn raw_uid(sync_uid: &str) -> &str {
    sync_uid.split_once('#').map_or(sync_uid, |(uid, _)| uid)
}

/// Human-readable summary: first three titles plus a count of the rest.
fn change_summary(summaries: &[String]) -> Option<String> {
    if summaries.is_empty() {
        return None;
    }

    const MAX_TITLES: usize = 3;
    let shown = summaries
        .iter()
        .take(MAX_TITLES)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");

    if summaries.len() <= MAX_TITLES {
        Some(format!("Synced: {shown}"))
    } else {
        Some(format!(
            "Synced: {shown} and {} more",
            summaries.len() - MAX_TITLES
        ))
    }
}
