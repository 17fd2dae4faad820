use askama::Template;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::accounts::{self, ProfileForm, DELETE_CONFIRMATION};
use crate::dashboard::{self, ProfileView};
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::feed::format_relative_time;
use crate::models::{initial_of, MediaType, Post};
use crate::routes::auth::clear_session_cookie;
use crate::routes::home::Html;
use crate::routes::{read_multipart, redirect_with_error, redirect_with_notice, Flash, Layout};
use crate::state::AppState;
use crate::uploads;

// --- View structs ---

pub struct ProfilePost {
    pub id: String,
    pub caption: String,
    pub category: String,
    pub media_url: Option<String>,
    pub is_video: bool,
    pub points_awarded: i64,
    pub posted: String,
}

impl From<Post> for ProfilePost {
    fn from(post: Post) -> Self {
        Self {
            media_url: post.media().map(str::to_string),
            is_video: post.media_type == Some(MediaType::Video),
            posted: format_relative_time(&post.created_at),
            id: post.id,
            caption: post.caption,
            category: post.category,
            points_awarded: post.points_awarded,
        }
    }
}

// --- Templates ---

#[derive(Template)]
#[template(path = "pages/profile.html")]
pub struct ProfileTemplate {
    pub layout: Layout,
    pub view: ProfileView,
    pub initial: String,
    pub photo: Option<String>,
    pub posts: Vec<ProfilePost>,
    pub confirmation: &'static str,
    pub max_photo_mb: u64,
}

// --- Forms ---

#[derive(Deserialize)]
pub struct ProfileFormData {
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
}

#[derive(Deserialize)]
pub struct DeleteForm {
    #[serde(default)]
    pub confirmation: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile_page).post(update_profile))
        .route("/profile/photo", post(upload_photo))
        .route("/profile/delete", post(delete_account))
}

// --- Handlers ---

async fn profile_page(
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

    let mut view =
        dashboard::load_profile(state.backend.store.as_ref(), &user.viewer(), profile).await?;
    let posts = std::mem::take(&mut view.posts)
        .into_iter()
        .map(ProfilePost::from)
        .collect();

    Ok(Html(ProfileTemplate {
        layout: Layout::signed_in(&state, &user, Some(&view.profile), "profile", flash),
        initial: initial_of(view.profile.display_name()),
        photo: view.profile.photo_url().map(str::to_string),
        posts,
        view,
        confirmation: DELETE_CONFIRMATION,
        max_photo_mb: uploads::PROFILES.max_bytes / (1024 * 1024),
    })
    .into_response())
}

async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<ProfileFormData>,
) -> Response {
    let form = ProfileForm {
        username: form.username,
        full_name: form.full_name,
        bio: form.bio,
    };
    match accounts::update_profile(&state.backend, &state.sessions, &user.session, &form).await {
        Ok(_) => redirect_with_notice("/profile", "Profile updated."),
        Err(e) => {
            tracing::warn!("Profile update failed for {}: {}", user.id(), e);
            redirect_with_error("/profile", &e.user_message())
        }
    }
}

async fn upload_photo(
    State(state): State<AppState>,
    user: CurrentUser,
    multipart: Multipart,
) -> AppResult<Response> {
    let form = read_multipart(multipart, "photo").await?;
    let Some(file) = form.file else {
        return Ok(redirect_with_error("/profile", "Please choose a photo to upload."));
    };

    Ok(
        match accounts::upload_profile_photo(&state.backend, &state.sessions, &user.session, &file)
            .await
        {
            Ok(_) => redirect_with_notice("/profile", "Profile photo updated."),
            Err(e) => {
                tracing::warn!("Avatar upload failed for {}: {}", user.id(), e);
                redirect_with_error("/profile", &e.user_message())
            }
        },
    )
}

async fn delete_account(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<DeleteForm>,
) -> Response {
    match accounts::delete_account(
        &state.backend,
        &state.sessions,
        &user.session,
        &form.confirmation,
    )
    .await
    {
        Ok(()) => (
            AppendHeaders([(
                header::SET_COOKIE,
                clear_session_cookie(&state.config.auth.cookie_name),
            )]),
            redirect_with_notice("/login", "Your account has been deleted."),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Account deletion failed for {}: {}", user.id(), e);
            redirect_with_error("/profile", &e.user_message())
        }
    }
}
