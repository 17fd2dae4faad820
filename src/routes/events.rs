use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::backend::BackendError;
use crate::events::{self, EventCard, EventDraft, EventError, DEFAULT_MAX_PARTICIPANTS};
use crate::extractors::CurrentUser;
use crate::routes::home::Html;
use crate::routes::{redirect_with_error, redirect_with_notice, Flash, Layout};
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/events.html")]
pub struct EventsTemplate {
    pub layout: Layout,
    pub events: Vec<EventCard>,
    pub default_max: i64,
}

#[derive(Deserialize)]
pub struct EventForm {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub event_date: String,
    #[serde(default)]
    pub max_participants: String,
}

impl EventForm {
    fn into_draft(self) -> EventDraft {
        let max = self.max_participants.trim();
        EventDraft {
            title: self.title,
            description: self.description,
            location: self.location,
            event_date: self.event_date,
            // Garbage parses to 0, which the range check rejects.
            max_participants: (!max.is_empty()).then(|| max.parse().unwrap_or(0)),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", get(events_page).post(create_event))
        .route("/events/{id}/join", post(join_event))
        .route("/events/{id}/leave", post(leave_event))
        .route("/events/{id}/delete", post(delete_event))
}

async fn events_page(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(mut flash): Query<Flash>,
) -> Html<EventsTemplate> {
    let events = match events::list_upcoming(
        state.backend.store.as_ref(),
        &user.viewer(),
        state.event_retention(),
    )
    .await
    {
        Ok(events) => events,
        Err(EventError::Backend(BackendError::NotConfigured)) => Vec::new(),
        Err(e) => {
            tracing::error!("Failed to load events: {}", e);
            flash.error.get_or_insert_with(|| e.user_message());
            Vec::new()
        }
    };

    Html(EventsTemplate {
        layout: Layout::signed_in(&state, &user, None, "events", flash),
        events,
        default_max: DEFAULT_MAX_PARTICIPANTS,
    })
}

async fn create_event(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<EventForm>,
) -> Response {
    let draft = form.into_draft();
    match events::create_event(state.backend.store.as_ref(), &user.viewer(), &draft).await {
        Ok(_) => redirect_with_notice("/events", "Event created."),
        Err(e) => {
            tracing::warn!("Create event failed for {}: {}", user.id(), e);
            redirect_with_error("/events", &e.user_message())
        }
    }
}

async fn join_event(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
) -> Response {
    match events::join(state.backend.store.as_ref(), &user.viewer(), &event_id).await {
        Ok(()) => redirect_with_notice("/events", "You joined the event."),
        Err(e) => redirect_with_error("/events", &e.user_message()),
    }
}

async fn leave_event(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
) -> Response {
    match events::leave(state.backend.store.as_ref(), &user.viewer(), &event_id).await {
        Ok(()) => redirect_with_notice("/events", "You left the event."),
        Err(e) => redirect_with_error("/events", &e.user_message()),
    }
}

async fn delete_event(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
) -> Response {
    match events::delete_event(state.backend.store.as_ref(), &user.viewer(), &event_id).await {
        Ok(()) => redirect_with_notice("/events", "Event deleted."),
        Err(e) => {
            tracing::warn!("Delete of event {} failed: {}", event_id, e);
            redirect_with_error("/events", &e.user_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(max: &str) -> EventForm {
        EventForm {
            title: "Beach clean".into(),
            description: "Bring gloves".into(),
            location: "North pier".into(),
            event_date: "2030-06-01T09:30".into(),
            max_participants: max.into(),
        }
    }

    #[test]
    fn blank_max_participants_uses_default() {
        assert_eq!(form("").into_draft().max_participants, None);
        assert_eq!(form(" 12 ").into_draft().max_participants, Some(12));
    }

    #[test]
    fn unparseable_max_participants_fails_validation() {
        let draft = form("lots").into_draft();
        assert!(matches!(draft.validate("u1"), Err(EventError::Invalid(_))));
    }
}
