//! Event diffing and conflict resolution.
//!
//! Compares the two sides of a mapping against the persisted event mappings
//! and produces the minimum set of changes, resolving conflicts by
//! last-write-wins with CalDAV as the source-of-truth tiebreak.
//!
//! Events are paired by sync key: the iCalendar UID, suffixed with the
//! recurrence instance id for overridden instances. When any override for a
//! UID is inside the window, the series master is dropped from the diff so
//! an instance is never double-counted against its master.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{CalDavEvent, GoogleEvent, SyncDirection};
use crate::models::event_mapping::Model as EventMappingModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    CalDavWins,
    GoogleWins,
    Skip,
}

/// One change to apply during a sync run.
#[derive(Debug, Clone)]
pub struct EventChange {
    pub action: ChangeAction,
    pub sync_uid: String,
    pub caldav_event: Option<CalDavEvent>,
    pub google_event: Option<GoogleEvent>,
    pub mapping: Option<EventMappingModel>,
    pub resolution: Option<ConflictResolution>,
    pub reason: String,
}

impl EventChange {
    fn new<R: Into<String>>(action: ChangeAction, sync_uid: String, reason: R) -> Self {
        Self {
            action,
            sync_uid,
            caldav_event: None,
            google_event: None,
            mapping: None,
            resolution: None,
            reason: reason.into(),
        }
    }

    fn with_caldav(mut self, event: &CalDavEvent) -> Self {
        self.caldav_event = Some(event.clone());
        self
    }

    fn with_google(mut self, event: &GoogleEvent) -> Self {
        self.google_event = Some(event.clone());
        self
    }

    fn with_mapping(mut self, mapping: Option<&EventMappingModel>) -> Self {
        self.mapping = mapping.cloned();
        self
    }
}

/// Changes of a bidirectional analysis, grouped by target side.
#[derive(Debug, Default)]
pub struct BidirectionalChanges {
    pub to_google: Vec<EventChange>,
    pub to_caldav: Vec<EventChange>,
    pub conflicts: Vec<EventChange>,
}

impl BidirectionalChanges {
    pub fn is_empty(&self) -> bool {
        self.to_google.is_empty() && self.to_caldav.is_empty() && self.conflicts.is_empty()
    }
}

/// Outcome of analyzing a pair that exists on both sides.
enum PairedOutcome {
    NoChange,
    UpdateToGoogle(EventChange),
    UpdateToCaldav(EventChange),
    Conflict(EventChange),
}

pub struct EventDiffer {
    mapping_id: Uuid,
}

impl EventDiffer {
    pub fn new(mapping_id: Uuid) -> Self {
        Self { mapping_id }
    }

    /// Analysis for a one-way mapping. Changes only ever target the
    /// direction's destination side.
    pub fn analyze_unidirectional(
        &self,
        caldav_events: &[CalDavEvent],
        google_events: &[GoogleEvent],
        mappings: &[EventMappingModel],
        direction: SyncDirection,
    ) -> Vec<EventChange> {
        let caldav_events = collapse_caldav_masters(caldav_events);
        let google_events = collapse_google_masters(google_events);
        let caldav_by_key: HashMap<String, &CalDavEvent> =
            caldav_events.iter().map(|e| (e.sync_key(), *e)).collect();
        let google_by_key: HashMap<String, &GoogleEvent> =
            google_events.iter().map(|e| (e.sync_key(), *e)).collect();
        let mappings_by_uid: HashMap<&str, &EventMappingModel> = mappings
            .iter()
            .map(|m| (m.caldav_uid.as_str(), m))
            .collect();

        let mut changes = Vec::new();

        match direction {
            SyncDirection::CaldavToGoogle => {
                for &event in &caldav_events {
                    let key = event.sync_key();
                    let target = google_by_key.get(key.as_str()).copied();
                    let mapping = mappings_by_uid.get(key.as_str()).copied();
                    if let Some(change) = self.caldav_source_change(event, target, mapping) {
                        changes.push(change);
                    }
                }
                // Target events absent from the source are deletions, but
                // only when this service created them
                for &event in &google_events {
                    let key = event.sync_key();
                    if !caldav_by_key.contains_key(key.as_str())
                        && let Some(mapping) = mappings_by_uid.get(key.as_str())
                    {
                        changes.push(
                            EventChange::new(ChangeAction::Delete, key, "event deleted from source")
                                .with_google(event)
                                .with_mapping(Some(mapping)),
                        );
                    }
                }
            }
            SyncDirection::GoogleToCaldav => {
                for &event in &google_events {
                    let key = event.sync_key();
                    let target = caldav_by_key.get(key.as_str()).copied();
                    let mapping = mappings_by_uid.get(key.as_str()).copied();
                    if let Some(change) = self.google_source_change(event, target, mapping) {
                        changes.push(change);
                    }
                }
                for &event in &caldav_events {
                    let key = event.sync_key();
                    if !google_by_key.contains_key(key.as_str())
                        && let Some(mapping) = mappings_by_uid.get(key.as_str())
                    {
                        changes.push(
                            EventChange::new(ChangeAction::Delete, key, "event deleted from source")
                                .with_caldav(event)
                                .with_mapping(Some(mapping)),
                        );
                    }
                }
            }
            SyncDirection::Bidirectional => {
                debug!(
                    mapping_id = %self.mapping_id,
                    "bidirectional mapping must be routed to analyze_bidirectional"
                );
            }
        }

        changes
    }

    /// Analysis for a bidirectional mapping, with conflict resolution.
    pub fn analyze_bidirectional(
        &self,
        caldav_events: &[CalDavEvent],
        google_events: &[GoogleEvent],
        mappings: &[EventMappingModel],
    ) -> BidirectionalChanges {
        let caldav_events = collapse_caldav_masters(caldav_events);
        let google_events = collapse_google_masters(google_events);
        let google_by_key: HashMap<String, &GoogleEvent> =
            google_events.iter().map(|e| (e.sync_key(), *e)).collect();
        let google_by_id: HashMap<&str, &GoogleEvent> = google_events
            .iter()
            .filter_map(|e| e.id.as_deref().map(|id| (id, *e)))
            .collect();
        let mappings_by_uid: HashMap<&str, &EventMappingModel> = mappings
            .iter()
            .map(|m| (m.caldav_uid.as_str(), m))
            .collect();
        let mappings_by_google_id: HashMap<&str, &EventMappingModel> = mappings
            .iter()
            .filter_map(|m| m.google_event_id.as_deref().map(|id| (id, m)))
            .collect();

        let mut changes = BidirectionalChanges::default();
        let mut processed: HashSet<String> = HashSet::new();

        for &caldav_event in &caldav_events {
            let key = caldav_event.sync_key();
            if !processed.insert(key.clone()) {
                continue;
            }

            let mapping = mappings_by_uid.get(key.as_str()).copied();
            let google_event = google_by_key.get(key.as_str()).copied().or_else(|| {
                mapping
                    .and_then(|m| m.google_event_id.as_deref())
                    .and_then(|id| google_by_id.get(id).copied())
            });

            match (google_event, mapping) {
                (Some(google_event), _) => {
                    // The pair may have been found through the tracked id
                    // rather than the key; claim both identities
                    processed.insert(google_event.sync_key());

                    match self.paired_change(caldav_event, google_event, mapping) {
                        PairedOutcome::NoChange => {}
                        PairedOutcome::UpdateToGoogle(change) => changes.to_google.push(change),
                        PairedOutcome::UpdateToCaldav(change) => changes.to_caldav.push(change),
                        PairedOutcome::Conflict(change) => changes.conflicts.push(change),
                    }
                }
                (None, Some(mapping)) if mapping.google_event_id.is_some() => {
                    // Tracked on both sides before; Google no longer has it,
                    // so the deletion propagates to CalDAV
                    changes.to_caldav.push(
                        EventChange::new(ChangeAction::Delete, key, "event deleted from google")
                            .with_caldav(caldav_event)
                            .with_mapping(Some(mapping)),
                    );
                }
                (None, mapping) => {
                    changes.to_google.push(
                        EventChange::new(ChangeAction::Insert, key, "new caldav event")
                            .with_caldav(caldav_event)
                            .with_mapping(mapping),
                    );
                }
            }
        }

        for &google_event in &google_events {
            let key = google_event.sync_key();
            if !processed.insert(key.clone()) {
                continue;
            }

            let mapping = google_event
                .id
                .as_deref()
                .and_then(|id| mappings_by_google_id.get(id).copied())
                .or_else(|| mappings_by_uid.get(key.as_str()).copied());

            match mapping {
                // Tracked before and gone from CalDAV: propagate the deletion
                Some(mapping) => {
                    processed.insert(mapping.caldav_uid.clone());
                    changes.to_google.push(
                        EventChange::new(ChangeAction::Delete, key, "event deleted from caldav")
                            .with_google(google_event)
                            .with_mapping(Some(mapping)),
                    );
                }
                None => {
                    changes.to_caldav.push(
                        EventChange::new(ChangeAction::Insert, key, "new google event")
                            .with_google(google_event),
                    );
                }
            }
        }

        // Orphaned mappings: tracked events absent from both sides. The
        // engine drops the row without touching either adapter.
        for mapping in mappings {
            if !processed.contains(mapping.caldav_uid.as_str()) {
                changes.to_google.push(
                    EventChange::new(
                        ChangeAction::Delete,
                        mapping.caldav_uid.clone(),
                        "event no longer exists on either side",
                    )
                    .with_mapping(Some(mapping)),
                );
            }
        }

        changes
    }

    /// Change detection for a pair that exists on both sides.
    fn paired_change(
        &self,
        caldav_event: &CalDavEvent,
        google_event: &GoogleEvent,
        mapping: Option<&EventMappingModel>,
    ) -> PairedOutcome {
        let key = caldav_event.sync_key();

        let caldav_hash = caldav_event.content_hash();
        let google_hash = google_event.content_hash();

        // Equal content is never a change, whatever the timestamps claim
        if caldav_hash == google_hash {
            return PairedOutcome::NoChange;
        }

        let Some(mapping) = mapping else {
            // Never synced, content differs: a conflict resolved by timestamps
            let (resolution, reason) = self.resolve_conflict(caldav_event, google_event);
            let mut change = EventChange::new(ChangeAction::Update, key, reason)
                .with_caldav(caldav_event)
                .with_google(google_event);
            change.resolution = Some(resolution);
            return PairedOutcome::Conflict(change);
        };

        let last_caldav = to_utc(mapping.last_caldav_modified);
        let last_google = to_utc(mapping.last_google_updated);

        let mut caldav_changed = match (caldav_event.last_modified, last_caldav) {
            (_, None) => true,
            (Some(modified), Some(last)) => modified > last,
            (None, Some(_)) => false,
        };
        let mut google_changed = match (google_event.updated, last_google) {
            (_, None) => true,
            (Some(updated), Some(last)) => updated > last,
            (None, Some(_)) => false,
        };

        // Timestamps can lie after restores or clock skew; fall back to the
        // recorded content hash
        if !caldav_changed && !google_changed {
            match mapping.content_hash.as_deref() {
                Some(recorded) => {
                    caldav_changed = caldav_hash != recorded;
                    google_changed = google_hash != recorded;
                }
                None => caldav_changed = true,
            }
        }

        let base = EventChange::new(ChangeAction::Update, key, "")
            .with_caldav(caldav_event)
            .with_google(google_event)
            .with_mapping(Some(mapping));

        match (caldav_changed, google_changed) {
            (false, false) => PairedOutcome::NoChange,
            (true, false) => PairedOutcome::UpdateToGoogle(EventChange {
                reason: "caldav event updated".to_string(),
                ..base
            }),
            (false, true) => PairedOutcome::UpdateToCaldav(EventChange {
                reason: "google event updated".to_string(),
                ..base
            }),
            (true, true) => {
                let (resolution, reason) = self.resolve_conflict(caldav_event, google_event);
                PairedOutcome::Conflict(EventChange {
                    resolution: Some(resolution),
                    reason,
                    ..base
                })
            }
        }
    }

    /// Last-write-wins with CalDAV as the tiebreak side.
    fn resolve_conflict(
        &self,
        caldav_event: &CalDavEvent,
        google_event: &GoogleEvent,
    ) -> (ConflictResolution, String) {
        let uid = caldav_event.sync_key();

        let (resolution, reason) = match (caldav_event.last_modified, google_event.updated) {
            (Some(caldav), Some(google)) => {
                if caldav > google {
                    (
                        ConflictResolution::CalDavWins,
                        format!("caldav more recent ({caldav} > {google})"),
                    )
                } else if google > caldav {
                    (
                        ConflictResolution::GoogleWins,
                        format!("google more recent ({google} > {caldav})"),
                    )
                } else {
                    (
                        ConflictResolution::CalDavWins,
                        format!("tie at {caldav}, caldav wins"),
                    )
                }
            }
            (Some(caldav), None) => (
                ConflictResolution::CalDavWins,
                format!("only caldav has a timestamp ({caldav})"),
            ),
            (None, Some(google)) => (
                ConflictResolution::GoogleWins,
                format!("only google has a timestamp ({google})"),
            ),
            (None, None) => {
                warn!(
                    mapping_id = %self.mapping_id,
                    uid = %uid,
                    "conflict with no timestamps on either side, defaulting to caldav"
                );
                (
                    ConflictResolution::CalDavWins,
                    "no timestamps available, caldav wins by default".to_string(),
                )
            }
        };

        info!(
            mapping_id = %self.mapping_id,
            uid = %uid,
            resolution = ?resolution,
            reason = %reason,
            "resolved sync conflict"
        );

        (resolution, reason)
    }

    /// One-way change test with CalDAV as the source.
    fn caldav_source_change(
        &self,
        source: &CalDavEvent,
        target: Option<&GoogleEvent>,
        mapping: Option<&EventMappingModel>,
    ) -> Option<EventChange> {
        let key = source.sync_key();

        let Some(target) = target else {
            return Some(
                EventChange::new(ChangeAction::Insert, key, "new caldav event")
                    .with_caldav(source)
                    .with_mapping(mapping),
            );
        };

        if let Some(mapping) = mapping {
            if let (Some(last), Some(modified)) =
                (to_utc(mapping.last_caldav_modified), source.last_modified)
                && modified <= last
            {
                return None;
            }
            if mapping.content_hash.as_deref() == Some(source.content_hash().as_str()) {
                return None;
            }
        }

        Some(
            EventChange::new(ChangeAction::Update, key, "caldav event updated")
                .with_caldav(source)
                .with_google(target)
                .with_mapping(mapping),
        )
    }

    /// One-way change test with Google as the source.
    fn google_source_change(
        &self,
        source: &GoogleEvent,
        target: Option<&CalDavEvent>,
        mapping: Option<&EventMappingModel>,
    ) -> Option<EventChange> {
        let key = source.sync_key();

        let Some(target) = target else {
            return Some(
                EventChange::new(ChangeAction::Insert, key, "new google event")
                    .with_google(source)
                    .with_mapping(mapping),
            );
        };

        if let Some(mapping) = mapping {
            if let (Some(last), Some(updated)) =
                (to_utc(mapping.last_google_updated), source.updated)
                && updated <= last
            {
                return None;
            }
            if mapping.content_hash.as_deref() == Some(source.content_hash().as_str()) {
                return None;
            }
        }

        Some(
            EventChange::new(ChangeAction::Update, key, "google event updated")
                .with_google(source)
                .with_caldav(target)
                .with_mapping(mapping),
        )
    }
}

/// Drop series masters whose overrides are in the window so instances never
/// compete with their master.
fn collapse_caldav_masters(events: &[CalDavEvent]) -> Vec<&CalDavEvent> {
    let overridden: HashSet<&str> = events
        .iter()
        .filter(|e| e.is_override())
        .map(|e| e.uid.as_str())
        .collect();

    events
        .iter()
        .filter(|e| {
            let shadowed =
                e.is_recurring() && !e.is_override() && overridden.contains(e.uid.as_str());
            if shadowed {
                debug!(uid = %e.uid, "dropping series master shadowed by overrides");
            }
            !shadowed
        })
        .collect()
}

fn collapse_google_masters(events: &[GoogleEvent]) -> Vec<&GoogleEvent> {
    let overridden: HashSet<String> = events
        .iter()
        .filter(|e| e.is_override())
        .map(|e| e.uid().to_string())
        .collect();

    events
        .iter()
        .filter(|e| {
            let shadowed = e.is_recurring() && !e.is_override() && overridden.contains(e.uid());
            if shadowed {
                debug!(uid = %e.uid(), "dropping series master shadowed by overrides");
            }
            !shadowed
        })
        .collect()
}

fn to_utc(value: Option<chrono::DateTime<chrono::FixedOffset>>) -> Option<DateTime<Utc>> {
    value.map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStatus;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, hour, 0, 0).unwrap()
    }

    fn caldav_event(uid: &str, summary: &str, modified: Option<DateTime<Utc>>) -> CalDavEvent {
        CalDavEvent {
            uid: uid.to_string(),
            summary: summary.to_string(),
            description: None,
            location: None,
            start: Some(ts(9)),
            end: Some(ts(10)),
            all_day: false,
            timezone: Some("UTC".to_string()),
            rrule: None,
            recurrence_instance_id: None,
            last_modified: modified,
            created: None,
            sequence: 0,
            status: EventStatus::Confirmed,
        }
    }

    fn google_event(
        uid: &str,
        id: &str,
        summary: &str,
        updated: Option<DateTime<Utc>>,
    ) -> GoogleEvent {
        GoogleEvent {
            id: Some(id.to_string()),
            ical_uid: Some(uid.to_string()),
            summary: summary.to_string(),
            description: None,
            location: None,
            start: Some(ts(9)),
            end: Some(ts(10)),
            all_day: false,
            timezone: Some("UTC".to_string()),
            recurrence: None,
            recurrence_instance_id: None,
            updated,
            created: None,
            sequence: 0,
            status: EventStatus::Confirmed,
        }
    }

    fn persisted_mapping(
        uid: &str,
        google_id: Option<&str>,
        last_caldav: Option<DateTime<Utc>>,
        last_google: Option<DateTime<Utc>>,
        hash: Option<String>,
    ) -> EventMappingModel {
        EventMappingModel {
            id: Uuid::new_v4(),
            mapping_id: Uuid::new_v4(),
            caldav_uid: uid.to_string(),
            google_event_id: google_id.map(str::to_string),
            last_caldav_modified: last_caldav.map(Into::into),
            last_google_updated: last_google.map(Into::into),
            last_sync_direction: None,
            content_hash: hash,
            created_at: ts(0).into(),
            updated_at: ts(0).into(),
        }
    }

    fn differ() -> EventDiffer {
        EventDiffer::new(Uuid::new_v4())
    }

    #[test]
    fn new_caldav_event_becomes_insert() {
        let caldav = vec![caldav_event("a", "Meeting", Some(ts(8)))];
        let changes =
            differ().analyze_unidirectional(&caldav, &[], &[], SyncDirection::CaldavToGoogle);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Insert);
        assert!(changes[0].caldav_event.is_some());
    }

    #[test]
    fn unchanged_pair_with_matching_hash_is_silent() {
        let caldav = vec![caldav_event("a", "Meeting", Some(ts(8)))];
        let google = vec![google_event("a", "g-1", "Meeting", Some(ts(8)))];
        let mapping = persisted_mapping(
            "a",
            Some("g-1"),
            Some(ts(8)),
            Some(ts(8)),
            Some(caldav[0].content_hash()),
        );

        let changes = differ().analyze_unidirectional(
            &caldav,
            &google,
            &[mapping],
            SyncDirection::CaldavToGoogle,
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn source_modification_becomes_update() {
        let caldav = vec![caldav_event("a", "Renamed", Some(ts(12)))];
        let google = vec![google_event("a", "g-1", "Meeting", Some(ts(8)))];
        let mapping = persisted_mapping(
            "a",
            Some("g-1"),
            Some(ts(8)),
            Some(ts(8)),
            Some(google[0].content_hash()),
        );

        let changes = differ().analyze_unidirectional(
            &caldav,
            &google,
            &[mapping],
            SyncDirection::CaldavToGoogle,
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Update);
    }

    #[test]
    fn source_deletion_becomes_delete_only_with_mapping() {
        let google = vec![google_event("a", "g-1", "Meeting", Some(ts(8)))];

        // No mapping: the target event was never ours to delete
        let changes =
            differ().analyze_unidirectional(&[], &google, &[], SyncDirection::CaldavToGoogle);
        assert!(changes.is_empty());

        let mapping = persisted_mapping("a", Some("g-1"), None, None, None);
        let changes = differ().analyze_unidirectional(
            &[],
            &google,
            &[mapping],
            SyncDirection::CaldavToGoogle,
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Delete);
    }

    #[test]
    fn bidirectional_conflict_newer_caldav_wins() {
        let caldav = vec![caldav_event("a", "From caldav", Some(ts(12)))];
        let google = vec![google_event("a", "g-1", "From google", Some(ts(11)))];
        let mapping = persisted_mapping(
            "a",
            Some("g-1"),
            Some(ts(8)),
            Some(ts(8)),
            Some("stale".to_string()),
        );

        let changes = differ().analyze_bidirectional(&caldav, &google, &[mapping]);
        assert_eq!(changes.conflicts.len(), 1);
        assert_eq!(
            changes.conflicts[0].resolution,
            Some(ConflictResolution::CalDavWins)
        );
    }

    #[test]
    fn bidirectional_conflict_tie_goes_to_caldav() {
        let caldav = vec![caldav_event("a", "From caldav", Some(ts(11)))];
        let google = vec![google_event("a", "g-1", "From google", Some(ts(11)))];
        let mapping = persisted_mapping(
            "a",
            Some("g-1"),
            Some(ts(8)),
            Some(ts(8)),
            Some("stale".to_string()),
        );

        let changes = differ().analyze_bidirectional(&caldav, &google, &[mapping]);
        assert_eq!(changes.conflicts.len(), 1);
        let conflict = &changes.conflicts[0];
        assert_eq!(conflict.resolution, Some(ConflictResolution::CalDavWins));
        assert!(conflict.reason.contains("tie"));
    }

    #[test]
    fn google_side_change_updates_caldav_in_bidirectional() {
        let caldav = vec![caldav_event("a", "Old title", Some(ts(8)))];
        let google = vec![google_event("a", "g-1", "New title", Some(ts(12)))];
        let mapping = persisted_mapping(
            "a",
            Some("g-1"),
            Some(ts(8)),
            Some(ts(8)),
            Some(caldav[0].content_hash()),
        );

        let changes = differ().analyze_bidirectional(&caldav, &google, &[mapping]);
        assert!(changes.conflicts.is_empty());
        assert!(changes.to_google.is_empty());
        assert_eq!(changes.to_caldav.len(), 1);
        assert_eq!(changes.to_caldav[0].action, ChangeAction::Update);
    }

    #[test]
    fn conflict_without_timestamps_defaults_to_caldav() {
        let caldav = vec![caldav_event("a", "From caldav", None)];
        let google = vec![google_event("a", "g-1", "From google", None)];

        let changes = differ().analyze_bidirectional(&caldav, &google, &[]);
        assert_eq!(changes.conflicts.len(), 1);
        assert_eq!(
            changes.conflicts[0].resolution,
            Some(ConflictResolution::CalDavWins)
        );
        assert!(changes.conflicts[0].reason.contains("default"));
    }

    #[test]
    fn equal_content_is_no_change_despite_divergent_timestamps() {
        let caldav = vec![caldav_event("a", "Same", Some(ts(12)))];
        let google = vec![google_event("a", "g-1", "Same", Some(ts(9)))];

        let changes = differ().analyze_bidirectional(&caldav, &google, &[]);
        assert!(changes.is_empty());
    }

    #[test]
    fn google_deletion_propagates_to_caldav_in_bidirectional() {
        let caldav = vec![caldav_event("a", "Meeting", Some(ts(8)))];
        let mapping = persisted_mapping("a", Some("g-1"), Some(ts(8)), Some(ts(8)), None);

        let changes = differ().analyze_bidirectional(&caldav, &[], &[mapping]);
        assert_eq!(changes.to_caldav.len(), 1);
        assert_eq!(changes.to_caldav[0].action, ChangeAction::Delete);
        assert!(changes.to_google.is_empty());
    }

    #[test]
    fn orphan_mapping_becomes_untargeted_delete() {
        let mapping = persisted_mapping("ghost", Some("g-9"), None, None, None);

        let changes = differ().analyze_bidirectional(&[], &[], &[mapping]);
        assert_eq!(changes.to_google.len(), 1);
        let change = &changes.to_google[0];
        assert_eq!(change.action, ChangeAction::Delete);
        assert!(change.caldav_event.is_none());
        assert!(change.google_event.is_none());
        assert!(change.mapping.is_some());
    }

    #[test]
    fn every_event_lands_in_exactly_one_outcome() {
        let caldav = vec![
            caldav_event("a", "Same", Some(ts(8))),
            caldav_event("b", "Caldav only", Some(ts(8))),
            caldav_event("c", "Conflicted c", Some(ts(12))),
        ];
        let google = vec![
            google_event("a", "g-a", "Same", Some(ts(8))),
            google_event("c", "g-c", "Conflicted g", Some(ts(11))),
            google_event("d", "g-d", "Google only", Some(ts(8))),
        ];
        let mappings = vec![
            persisted_mapping("c", Some("g-c"), Some(ts(7)), Some(ts(7)), Some("x".into())),
            persisted_mapping("ghost", Some("g-ghost"), None, None, None),
        ];

        let changes = differ().analyze_bidirectional(&caldav, &google, &mappings);

        let total = changes.to_google.len() + changes.to_caldav.len() + changes.conflicts.len();
        // b insert, c conflict, d insert, ghost orphan; a is silent
        assert_eq!(total, 4);

        let mut seen: Vec<&str> = changes
            .to_google
            .iter()
            .chain(&changes.to_caldav)
            .chain(&changes.conflicts)
            .map(|c| c.sync_uid.as_str())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec!["b", "c", "d", "ghost"]);
    }

    #[test]
    fn master_is_dropped_when_override_is_in_window() {
        let mut master = caldav_event("series", "Standup", Some(ts(8)));
        master.rrule = Some("FREQ=DAILY".to_string());
        let mut moved = caldav_event("series", "Standup (moved)", Some(ts(9)));
        moved.recurrence_instance_id = Some("20250115T090000Z".to_string());

        let events = vec![master, moved];
        let collapsed = collapse_caldav_masters(&events);
        assert_eq!(collapsed.len(), 1);
        assert!(collapsed[0].is_override());
    }

    #[test]
    fn direction_filter_blocks_wrong_direction() {
        let google = vec![google_event("a", "g-1", "Google only", Some(ts(8)))];

        // Google-only event under caldav_to_google produces nothing
        let changes =
            differ().analyze_unidirectional(&[], &google, &[], SyncDirection::CaldavToGoogle);
        assert!(changes.is_empty());

        // Same inputs under google_to_caldav produce an insert
        let changes =
            differ().analyze_unidirectional(&[], &google, &[], SyncDirection::GoogleToCaldav);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Insert);
    }
}
