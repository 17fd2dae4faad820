//! Community events: listing, participation and the retention sweep.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use thiserror::Error;

use crate::backend::{BackendError, BackendResult, Credential, Store};
use crate::models::{Event, EventWithCreator, NewEvent};
use crate::session::Viewer;

pub const DEFAULT_MAX_PARTICIPANTS: i64 = 50;
pub const MAX_PARTICIPANTS_LIMIT: i64 = 1000;

/// Formats a `datetime-local` input may submit.
const FORM_DATE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Error)]
pub enum EventError {
    #[error("{0}")]
    Invalid(String),

    #[error("event not found")]
    NotFound,

    #[error("event is full")]
    Full,

    #[error("already joined")]
    AlreadyJoined,

    #[error("only the creator can delete this event")]
    NotCreator,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl EventError {
    pub fn user_message(&self) -> String {
        match self {
            EventError::Invalid(msg) => msg.clone(),
            EventError::NotFound => "That event no longer exists.".to_string(),
            EventError::Full => "This event is full.".to_string(),
            EventError::AlreadyJoined => "You have already joined this event.".to_string(),
            EventError::NotCreator => "Only the creator can delete this event.".to_string(),
            EventError::Backend(e) if e.is_access_denied() => {
                "You are not allowed to do that.".to_string()
            }
            EventError::Backend(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

pub struct EventCard {
    pub id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub date: String,
    pub time: String,
    pub creator_name: String,
    pub participant_count: u64,
    pub max_participants: i64,
    pub is_participant: bool,
    pub is_full: bool,
    pub can_delete: bool,
}

impl EventCard {
    fn new(
        row: EventWithCreator,
        participant_count: u64,
        is_participant: bool,
        viewer: &Viewer,
    ) -> Self {
        let event = row.event;
        Self {
            creator_name: row
                .creator
                .as_ref()
                .map(|c| c.display_name().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            date: event.event_date.format("%a, %b %-d, %Y").to_string(),
            time: event.event_date.format("%H:%M").to_string(),
            is_full: participant_count >= event.max_participants.max(0) as u64,
            can_delete: event.created_by == viewer.user_id,
            participant_count,
            is_participant,
            max_participants: event.max_participants,
            id: event.id,
            title: event.title,
            description: event.description,
            location: event.location,
        }
    }
}

/// Sweep, then list events from now on with participation details.
pub async fn list_upcoming(
    store: &dyn Store,
    viewer: &Viewer,
    retention: Duration,
) -> Result<Vec<EventCard>, EventError> {
    let now = Utc::now();
    if let Err(e) = sweep_expired(store, &viewer.credential, retention, now).await {
        tracing::warn!("Event sweep on page load failed: {}", e);
    }

    let rows = store.list_events_from(&viewer.credential, now).await?;
    let details = futures::future::try_join_all(rows.iter().map(|row| async move {
        let id = &row.event.id;
        futures::try_join!(
            store.count_participants(&viewer.credential, id),
            store.is_participant(&viewer.credential, id, &viewer.user_id),
        )
    }))
    .await?;

    Ok(rows
        .into_iter()
        .zip(details)
        .map(|(row, (count, joined))| EventCard::new(row, count, joined, viewer))
        .collect())
}

/// Fields of the create-event form.
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub title: String,
    pub description: String,
    pub location: String,
    pub event_date: String,
    pub max_participants: Option<i64>,
}

/// Parse a `datetime-local` value. The form carries no zone; it is read as UTC.
pub fn parse_event_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    FORM_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl EventDraft {
    pub fn validate(&self, created_by: &str) -> Result<NewEvent, EventError> {
        let title = self.title.trim();
        let description = self.description.trim();
        let location = self.location.trim();
        if title.is_empty() || description.is_empty() || location.is_empty() {
            return Err(EventError::Invalid(
                "Title, description and location are required.".into(),
            ));
        }
        let event_date = parse_event_date(&self.event_date)
            .ok_or_else(|| EventError::Invalid("Please pick a valid date and time.".into()))?;
        let max_participants = self.max_participants.unwrap_or(DEFAULT_MAX_PARTICIPANTS);
        if !(1..=MAX_PARTICIPANTS_LIMIT).contains(&max_participants) {
            return Err(EventError::Invalid(format!(
                "Max participants must be between 1 and {MAX_PARTICIPANTS_LIMIT}."
            )));
        }
        Ok(NewEvent {
            title: title.to_string(),
            description: description.to_string(),
            location: location.to_string(),
            event_date,
            created_by: created_by.to_string(),
            max_participants,
        })
    }
}

pub async fn create_event(
    store: &dyn Store,
    viewer: &Viewer,
    draft: &EventDraft,
) -> Result<Event, EventError> {
    let row = draft.validate(&viewer.user_id)?;
    let event = store.insert_event(&viewer.credential, &row).await?;
    tracing::info!("User {} created event {}", viewer.user_id, event.id);
    Ok(event)
}

async fn require_event(
    store: &dyn Store,
    cred: &Credential,
    event_id: &str,
) -> Result<Event, EventError> {
    store
        .get_event(cred, event_id)
        .await?
        .ok_or(EventError::NotFound)
}

pub async fn join(store: &dyn Store, viewer: &Viewer, event_id: &str) -> Result<(), EventError> {
    let cred = &viewer.credential;
    let event = require_event(store, cred, event_id).await?;
    if store.is_participant(cred, event_id, &viewer.user_id).await? {
        return Err(EventError::AlreadyJoined);
    }
    let count = store.count_participants(cred, event_id).await?;
    if count >= event.max_participants.max(0) as u64 {
        return Err(EventError::Full);
    }
    store
        .insert_participant(cred, event_id, &viewer.user_id)
        .await?;
    tracing::info!("User {} joined event {}", viewer.user_id, event_id);
    Ok(())
}

pub async fn leave(store: &dyn Store, viewer: &Viewer, event_id: &str) -> Result<(), EventError> {
    store
        .delete_participant(&viewer.credential, event_id, &viewer.user_id)
        .await?;
    tracing::info!("User {} left event {}", viewer.user_id, event_id);
    Ok(())
}

pub async fn delete_event(
    store: &dyn Store,
    viewer: &Viewer,
    event_id: &str,
) -> Result<(), EventError> {
    let event = require_event(store, &viewer.credential, event_id).await?;
    if event.created_by != viewer.user_id {
        return Err(EventError::NotCreator);
    }
    remove_events(store, &viewer.credential, &[event.id]).await?;
    Ok(())
}

/// Delete events and their participants, participants first. Ids that are
/// already gone are skipped silently.
pub async fn remove_events(
    store: &dyn Store,
    cred: &Credential,
    event_ids: &[String],
) -> BackendResult<u64> {
    if event_ids.is_empty() {
        return Ok(0);
    }
    let participants = store.delete_participants_of(cred, event_ids).await?;
    let events = store.delete_events(cred, event_ids).await?;
    tracing::info!(
        "Removed {} events and {} participant rows",
        events,
        participants
    );
    Ok(events)
}

/// Remove events whose date is more than `retention` before `now`.
pub async fn sweep_expired(
    store: &dyn Store,
    cred: &Credential,
    retention: Duration,
    now: DateTime<Utc>,
) -> BackendResult<u64> {
    let cutoff = now - retention;
    let ids = store.event_ids_before(cred, cutoff).await?;
    if ids.is_empty() {
        tracing::debug!("No events before {} to sweep", cutoff);
        return Ok(0);
    }
    remove_events(store, cred, &ids).await
}

/// Run the sweep now and then every `every`, for the life of the server.
pub fn spawn_sweeper(
    store: Arc<dyn Store>,
    every: std::time::Duration,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match sweep_expired(store.as_ref(), &Credential::Service, retention, Utc::now()).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Event sweep removed {} events", n),
                Err(BackendError::NotConfigured) => {
                    tracing::debug!("Event sweep skipped, backend not configured")
                }
                Err(e) => tracing::warn!("Event sweep failed: {}", e),
            }
        }
    })
}
