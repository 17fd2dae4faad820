use chrono::{Duration, Utc};

use crate::backend::{BackendResult, Store};
use crate::models::{Action, EventSummary, Post, Profile};
use crate::points::LevelProgress;
use crate::session::Viewer;

pub const RECENT_ACTIONS: usize = 5;
const WEEKLY_WINDOW_DAYS: i64 = 7;

pub struct DashboardStats {
    pub post_count: u64,
    pub total_points: i64,
    pub recent_actions: Vec<Action>,
    pub weekly_actions: u64,
    pub joined_events: Vec<EventSummary>,
    pub level: LevelProgress,
}

pub async fn load_dashboard(
    store: &dyn Store,
    viewer: &Viewer,
    profile: &Profile,
) -> BackendResult<DashboardStats> {
    let cred = &viewer.credential;
    let week_ago = Utc::now() - Duration::days(WEEKLY_WINDOW_DAYS);

    let (post_count, recent_actions, weekly_actions, joined_events) = futures::try_join!(
        store.count_user_posts(cred, &viewer.user_id),
        store.list_actions(cred, &viewer.user_id, Some(RECENT_ACTIONS)),
        store.count_actions_since(cred, &viewer.user_id, week_ago),
        store.joined_events(cred, &viewer.user_id),
    )?;

    let mut joined_events = joined_events;
    joined_events.sort_by_key(|e| e.event_date);

    Ok(DashboardStats {
        post_count,
        total_points: profile.points,
        recent_actions,
        weekly_actions,
        joined_events,
        level: LevelProgress::from_points(profile.points),
    })
}

pub struct ProfileView {
    pub profile: Profile,
    pub posts: Vec<Post>,
    pub member_since: String,
    pub level: LevelProgress,
}

pub async fn load_profile(
    store: &dyn Store,
    viewer: &Viewer,
    profile: Profile,
) -> BackendResult<ProfileView> {
    let posts = store
        .list_user_posts(&viewer.credential, &viewer.user_id)
        .await?;
    Ok(ProfileView {
        member_since: profile.created_at.format("%B %Y").to_string(),
        level: LevelProgress::from_points(profile.points),
        profile,
        posts,
    })
}
