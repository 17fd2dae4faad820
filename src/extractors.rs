use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::session::{Session, Viewer};
use crate::state::AppState;

/// The signed-in user behind the session cookie.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub token: String,
    pub session: Session,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.session.user_id
    }

    pub fn viewer(&self) -> Viewer {
        self.session.viewer()
    }
}

/// Extractor that requires authentication.
/// Rejects with `Unauthorized`, which redirects to the login page.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_session_token(parts, &state.config.auth.cookie_name)
            .ok_or(AppError::Unauthorized)?
            .to_string();

        let session = state
            .sessions
            .lock()
            .await
            .get(&token)
            .ok_or(AppError::Unauthorized)?;

        Ok(CurrentUser { token, session })
    }
}

/// Optional user extractor: `None` instead of a redirect when signed out.
pub struct MaybeUser(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(_) => Ok(MaybeUser(None)),
        }
    }
}

pub(crate) fn extract_session_token<'a>(parts: &'a Parts, cookie_name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == cookie_name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_cookie(cookie: &str) -> Parts {
        let (parts, _) = Request::builder()
            .header(header::COOKIE, cookie)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn finds_named_cookie_among_others() {
        let parts = parts_with_cookie("theme=dark; greenpoint_session=abc123; other=1");
        assert_eq!(
            extract_session_token(&parts, "greenpoint_session"),
            Some("abc123")
        );
    }

    #[test]
    fn empty_or_missing_cookie_is_none() {
        let parts = parts_with_cookie("greenpoint_session=");
        assert_eq!(extract_session_token(&parts, "greenpoint_session"), None);
        let parts = parts_with_cookie("theme=dark");
        assert_eq!(extract_session_token(&parts, "greenpoint_session"), None);
    }
}
