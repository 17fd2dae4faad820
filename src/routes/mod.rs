pub mod assets;
pub mod auth;
pub mod dashboard;
pub mod events;
pub mod feed;
pub mod home;
pub mod leaderboard;
pub mod profile;

use std::collections::HashMap;

use axum::extract::{DefaultBodyLimit, Multipart};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::models::Profile;
use crate::state::AppState;
use crate::uploads::{MediaFile, POSTS};

/// Largest bucket limit plus room for the other form fields.
const MAX_BODY_BYTES: usize = POSTS.max_bytes as usize + 1024 * 1024;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(home::index))
        .route("/assets/{*path}", get(assets::serve))
        .merge(auth::router())
        .merge(feed::router())
        .merge(profile::router())
        .merge(dashboard::router())
        .merge(leaderboard::router())
        .merge(events::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

/// One-shot messages carried in the query string after a redirect.
#[derive(Debug, Default, Deserialize)]
pub struct Flash {
    pub error: Option<String>,
    pub notice: Option<String>,
}

fn with_param(path: &str, key: &str, message: &str) -> String {
    let sep = if path.contains('?') { '&' } else { '?' };
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    format!("{path}{sep}{key}={encoded}")
}

pub fn redirect_with_error(path: &str, message: &str) -> Response {
    Redirect::to(&with_param(path, "error", message)).into_response()
}

pub fn redirect_with_notice(path: &str, message: &str) -> Response {
    Redirect::to(&with_param(path, "notice", message)).into_response()
}

/// Navigation and flash data every page shares.
pub struct Layout {
    pub signed_in: bool,
    pub username: String,
    pub points: i64,
    pub active: &'static str,
    pub backend_ready: bool,
    pub error: Option<String>,
    pub notice: Option<String>,
}

impl Layout {
    pub fn guest(state: &AppState, flash: Flash) -> Self {
        Self {
            signed_in: false,
            username: String::new(),
            points: 0,
            active: "",
            backend_ready: state.backend.is_configured(),
            error: flash.error,
            notice: flash.notice,
        }
    }

    pub fn signed_in(
        state: &AppState,
        user: &CurrentUser,
        profile: Option<&Profile>,
        active: &'static str,
        flash: Flash,
    ) -> Self {
        let profile = profile.or(user.session.profile.as_ref());
        Self {
            signed_in: true,
            username: profile
                .map(|p| p.username.clone())
                .unwrap_or_else(|| user.session.email.clone()),
            points: profile.map(|p| p.points).unwrap_or(0),
            active,
            backend_ready: state.backend.is_configured(),
            error: flash.error,
            notice: flash.notice,
        }
    }
}

/// Text fields and at most one file from a multipart form.
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub file: Option<MediaFile>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }
}

/// Browsers send an empty part when no file was chosen; that reads as `None`.
pub async fn read_multipart(mut multipart: Multipart, file_field: &str) -> AppResult<UploadForm> {
    let mut fields = HashMap::new();
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        if name == file_field {
            let file_name = field.file_name().unwrap_or("").to_string();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await?;
            if !file_name.is_empty() || !bytes.is_empty() {
                file = Some(MediaFile::new(file_name, content_type, bytes));
            }
        } else {
            fields.insert(name, field.text().await?);
        }
    }

    Ok(UploadForm { fields, file })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_params_are_url_encoded() {
        assert_eq!(
            with_param("/home", "error", "File is too large."),
            "/home?error=File+is+too+large."
        );
        assert_eq!(
            with_param("/home?category=water", "notice", "a&b"),
            "/home?category=water&notice=a%26b"
        );
    }
}
