use askama::Template;
use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::accounts;
use crate::backend::BackendError;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::feed::{self, FeedError, FeedFilter, FeedItem, PostDraft, POST_CATEGORIES};
use crate::points::POST_CREATED_POINTS;
use crate::routes::home::Html;
use crate::routes::{read_multipart, redirect_with_error, redirect_with_notice, Flash, Layout};
use crate::state::AppState;

// --- View structs ---

pub struct FilterChip {
    pub key: &'static str,
    pub label: &'static str,
    pub active: bool,
}

// --- Templates ---

#[derive(Template)]
#[template(path = "pages/feed.html")]
pub struct FeedTemplate {
    pub layout: Layout,
    pub items: Vec<FeedItem>,
    pub filters: Vec<FilterChip>,
}

#[derive(Template)]
#[template(path = "pages/create.html")]
pub struct CreateTemplate {
    pub layout: Layout,
    pub categories: Vec<&'static str>,
    pub points: i64,
}

// --- Forms ---

#[derive(Deserialize)]
pub struct FeedQuery {
    pub category: Option<String>,
    pub error: Option<String>,
    pub notice: Option<String>,
}

#[derive(Deserialize)]
pub struct CommentForm {
    pub content: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/home", get(feed_page))
        .route("/create", get(create_page).post(create_post))
        .route("/posts/{id}/like", post(toggle_like))
        .route("/posts/{id}/comments", post(add_comment))
        .route("/posts/{id}/delete", post(delete_post))
}

// --- Handlers ---

/// Reload the cached profile so the nav shows the new total.
async fn refresh_points(state: &AppState, user: &CurrentUser) {
    if let Err(e) = accounts::current_profile(&state.backend, &state.sessions, &user.session).await
    {
        tracing::warn!("Could not refresh profile for {}: {}", user.id(), e);
    }
}

async fn feed_page(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<FeedQuery>,
) -> AppResult<Html<FeedTemplate>> {
    let filter = FeedFilter::parse(query.category.as_deref().unwrap_or("all"));
    let mut flash = Flash {
        error: query.error,
        notice: query.notice,
    };

    let items = match feed::fetch_feed(state.backend.store.as_ref(), &user.viewer(), filter).await {
        Ok(items) => items,
        Err(FeedError::Backend(BackendError::NotConfigured)) => Vec::new(),
        Err(e) => {
            tracing::error!("Failed to load feed: {}", e);
            flash.error.get_or_insert_with(|| e.user_message());
            Vec::new()
        }
    };

    let filters = FeedFilter::ALL
        .iter()
        .map(|f| FilterChip {
            key: f.key(),
            label: f.label(),
            active: *f == filter,
        })
        .collect();

    Ok(Html(FeedTemplate {
        layout: Layout::signed_in(&state, &user, None, "home", flash),
        items,
        filters,
    }))
}

async fn toggle_like(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> Response {
    match feed::toggle_like(state.backend.store.as_ref(), &user.viewer(), &post_id).await {
        Ok(_) => Redirect::to(&format!("/home#post-{post_id}")).into_response(),
        Err(e) => {
            tracing::warn!("Like toggle on {} failed: {}", post_id, e);
            redirect_with_error("/home", &e.user_message())
        }
    }
}

async fn add_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
    Form(form): Form<CommentForm>,
) -> Response {
    match feed::add_comment(
        state.backend.store.as_ref(),
        &user.viewer(),
        &post_id,
        &form.content,
    )
    .await
    {
        Ok(()) => Redirect::to(&format!("/home#post-{post_id}")).into_response(),
        Err(e) => {
            tracing::warn!("Comment on {} failed: {}", post_id, e);
            redirect_with_error("/home", &e.user_message())
        }
    }
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> Response {
    match feed::delete_post(state.backend.store.as_ref(), &user.viewer(), &post_id).await {
        Ok(()) => {
            refresh_points(&state, &user).await;
            redirect_with_notice("/home", "Post deleted.")
        }
        Err(e) => {
            tracing::warn!("Delete of post {} failed: {}", post_id, e);
            redirect_with_error("/home", &e.user_message())
        }
    }
}

async fn create_page(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(flash): Query<Flash>,
) -> Html<CreateTemplate> {
    Html(CreateTemplate {
        layout: Layout::signed_in(&state, &user, None, "create", flash),
        categories: POST_CATEGORIES.to_vec(),
        points: POST_CREATED_POINTS,
    })
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> AppResult<Response> {
    let form = read_multipart(multipart, "media").await?;
    let draft = PostDraft {
        caption: form.field("caption"),
        category: form.field("category"),
        custom_category: form.field("custom_category"),
        media: form.file,
    };

    let result = feed::create_post(
        state.backend.store.as_ref(),
        state.backend.objects.as_ref(),
        &user.viewer(),
        draft,
    )
    .await;

    Ok(match result {
        Ok(_) => {
            refresh_points(&state, &user).await;
            redirect_with_notice(
                "/home",
                &format!("Post shared! You earned {POST_CREATED_POINTS} points."),
            )
        }
        Err(e) => {
            tracing::warn!("Create post failed for {}: {}", user.id(), e);
            redirect_with_error("/create", &e.user_message())
        }
    })
}
