use askama::Template;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::backend::BackendError;
use crate::extractors::CurrentUser;
use crate::leaderboard::{self, Frame, RankedUser};
use crate::routes::home::Html;
use crate::routes::{Flash, Layout};
use crate::state::AppState;

pub struct FrameTab {
    pub key: &'static str,
    pub label: &'static str,
    pub active: bool,
}

#[derive(Template)]
#[template(path = "pages/leaderboard.html")]
pub struct LeaderboardTemplate {
    pub layout: Layout,
    pub frames: Vec<FrameTab>,
    pub frame_label: &'static str,
    pub users: Vec<RankedUser>,
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    pub frame: Option<String>,
    pub error: Option<String>,
    pub notice: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/leaderboard", get(leaderboard_page))
}

async fn leaderboard_page(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<LeaderboardQuery>,
) -> Html<LeaderboardTemplate> {
    let frame = Frame::parse(query.frame.as_deref().unwrap_or_default());
    let mut flash = Flash {
        error: query.error,
        notice: query.notice,
    };

    let viewer = user.viewer();
    let users = match leaderboard::load(
        state.backend.store.as_ref(),
        &viewer.credential,
        frame,
        user.id(),
    )
    .await
    {
        Ok(users) => users,
        Err(BackendError::NotConfigured) => Vec::new(),
        Err(e) => {
            tracing::error!("Failed to load leaderboard: {}", e);
            flash
                .error
                .get_or_insert_with(|| "Could not load the leaderboard.".to_string());
            Vec::new()
        }
    };

    let frames = Frame::ALL
        .iter()
        .map(|f| FrameTab {
            key: f.key(),
            label: f.label(),
            active: *f == frame,
        })
        .collect();

    Html(LeaderboardTemplate {
        layout: Layout::signed_in(&state, &user, None, "leaderboard", flash),
        frames,
        frame_label: frame.label(),
        users,
    })
}
