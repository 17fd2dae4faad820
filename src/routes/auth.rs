use askama::Template;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::accounts::{self, SignUpForm, SignUpResult};
use crate::extractors::MaybeUser;
use crate::routes::home::Html;
use crate::routes::{redirect_with_error, redirect_with_notice, Flash, Layout};
use crate::state::AppState;

// -- Templates --

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub layout: Layout,
}

#[derive(Template)]
#[template(path = "pages/signup.html")]
pub struct SignupTemplate {
    pub layout: Layout,
    pub email: String,
    pub username: String,
    pub full_name: String,
}

#[derive(Template)]
#[template(path = "pages/verify.html")]
pub struct VerifyTemplate {
    pub layout: Layout,
    pub email: String,
}

// -- Forms --

#[derive(Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct SignupFormData {
    pub email: String,
    pub password: String,
    pub username: String,
    pub full_name: String,
}

#[derive(Deserialize)]
pub struct VerifyForm {
    pub email: String,
    pub code: String,
}

// -- Cookie helpers --

pub(crate) fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

pub(crate) fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

// -- Router --

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/signup", get(signup_page).post(signup))
        .route("/signup/verify", post(verify))
        .route("/logout", post(logout))
}

// -- Handlers --

async fn login_page(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(flash): Query<Flash>,
) -> Response {
    if user.is_some() {
        return Redirect::to("/home").into_response();
    }
    Html(LoginTemplate {
        layout: Layout::guest(&state, flash),
    })
    .into_response()
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    match accounts::sign_in(&state.backend, &state.sessions, &form.email, &form.password).await {
        Ok(token) => {
            let cookie = session_cookie(
                &state.config.auth.cookie_name,
                &token,
                state.config.auth.session_hours,
            );
            (
                AppendHeaders([(header::SET_COOKIE, cookie)]),
                Redirect::to("/home"),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!("Sign-in failed for {}: {}", form.email.trim(), e);
            redirect_with_error("/login", &e.user_message())
        }
    }
}

async fn signup_page(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(flash): Query<Flash>,
) -> Response {
    if user.is_some() {
        return Redirect::to("/home").into_response();
    }
    Html(SignupTemplate {
        layout: Layout::guest(&state, flash),
        email: String::new(),
        username: String::new(),
        full_name: String::new(),
    })
    .into_response()
}

async fn signup(State(state): State<AppState>, Form(form): Form<SignupFormData>) -> Response {
    let request = SignUpForm {
        email: form.email,
        password: form.password,
        username: form.username,
        full_name: form.full_name,
    };
    match accounts::sign_up(&state.backend, &request).await {
        Ok(SignUpResult::VerificationRequired) => {
            let email = request.email.trim().to_string();
            Html(VerifyTemplate {
                layout: Layout::guest(
                    &state,
                    Flash {
                        error: None,
                        notice: Some(format!("We sent a 6-digit code to {email}.")),
                    },
                ),
                email,
            })
            .into_response()
        }
        Ok(SignUpResult::Ready) => {
            redirect_with_notice("/login", "Account created. Please sign in.")
        }
        Err(e) => {
            tracing::warn!("Sign-up failed for {}: {}", request.email.trim(), e);
            Html(SignupTemplate {
                layout: Layout::guest(
                    &state,
                    Flash {
                        error: Some(e.user_message()),
                        notice: None,
                    },
                ),
                email: request.email,
                username: request.username,
                full_name: request.full_name,
            })
            .into_response()
        }
    }
}

async fn verify(State(state): State<AppState>, Form(form): Form<VerifyForm>) -> Response {
    match accounts::verify_otp(&state.backend, &form.email, &form.code).await {
        Ok(()) => redirect_with_notice("/login", "Email verified. Please sign in."),
        Err(e) => Html(VerifyTemplate {
            layout: Layout::guest(
                &state,
                Flash {
                    error: Some(e.user_message()),
                    notice: None,
                },
            ),
            email: form.email,
        })
        .into_response(),
    }
}

async fn logout(State(state): State<AppState>, MaybeUser(user): MaybeUser) -> Response {
    if let Some(user) = user {
        accounts::sign_out(&state.backend, &state.sessions, &user.token).await;
    }
    (
        AppendHeaders([(
            header::SET_COOKIE,
            clear_session_cookie(&state.config.auth.cookie_name),
        )]),
        Redirect::to("/login"),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_sets_max_age_in_seconds() {
        let cookie = session_cookie("greenpoint_session", "abc", 2);
        assert!(cookie.starts_with("greenpoint_session=abc;"));
        assert!(cookie.contains("Max-Age=7200"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        assert!(clear_session_cookie("greenpoint_session").contains("Max-Age=0"));
    }
}
