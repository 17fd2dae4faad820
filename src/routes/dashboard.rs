use askama::Template;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::accounts;
use crate::dashboard::{self, DashboardStats};
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::feed::format_relative_time;
use crate::models::{Action, EventSummary};
use crate::routes::home::Html;
use crate::routes::{redirect_with_error, Flash, Layout};
use crate::state::AppState;

pub struct ActionRow {
    pub description: String,
    pub points: i64,
    pub when: String,
}

impl From<Action> for ActionRow {
    fn from(action: Action) -> Self {
        Self {
            when: format_relative_time(&action.created_at),
            description: action.description,
            points: action.points,
        }
    }
}

pub struct JoinedEventRow {
    pub id: String,
    pub title: String,
    pub when: String,
    pub location: String,
}

impl From<EventSummary> for JoinedEventRow {
    fn from(event: EventSummary) -> Self {
        Self {
            when: event.event_date.format("%b %-d, %H:%M").to_string(),
            id: event.id,
            title: event.title,
            location: event.location,
        }
    }
}

#[derive(Template)]
#[template(path = "pages/dashboard.html")]
pub struct DashboardTemplate {
    pub layout: Layout,
    pub display_name: String,
    pub stats: DashboardStats,
    pub actions: Vec<ActionRow>,
    pub events: Vec<JoinedEventRow>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard_page))
}

/// Personal stats: points, level, recent ledger entries and joined events.
async fn dashboard_page(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(flash): Query<Flash>,
) -> AppResult<Response> {
    let profile = match accounts::current_profile(&state.backend, &state.sessions, &user.session)
        .await
    {
        Ok(profile) => profile,
        Err(e) => {
            tracing::error!("Failed to load profile for {}: {}", user.id(), e);
            return Ok(redirect_with_error("/home", &e.user_message()));
        }
    };

    let mut stats =
        dashboard::load_dashboard(state.backend.store.as_ref(), &user.viewer(), &profile).await?;
    let actions = std::mem::take(&mut stats.recent_actions)
        .into_iter()
        .map(ActionRow::from)
        .collect();
    let events = std::mem::take(&mut stats.joined_events)
        .into_iter()
        .map(JoinedEventRow::from)
        .collect();

    Ok(Html(DashboardTemplate {
        layout: Layout::signed_in(&state, &user, Some(&profile), "dashboard", flash),
        display_name: profile.display_name().to_string(),
        stats,
        actions,
        events,
    })
    .into_response())
}
