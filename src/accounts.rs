//! Sign-in, sign-up and profile management on top of the session store.

use thiserror::Error;
use tokio::sync::Mutex;

use crate::backend::{
    AuthUser, Backend, BackendError, Credential, Store, Table, UserMetadata,
};
use crate::models::{NewProfile, Profile, ProfileUpdate};
use crate::session::{Session, SessionStore, Viewer};
use crate::uploads::{self, MediaFile, UploadError};

const MIN_PASSWORD_LEN: usize = 6;
pub const DELETE_CONFIRMATION: &str = "DELETE";
pub const RESET_CONFIRMATION: &str = "RESET";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Invalid(String),

    #[error("invalid one-time code")]
    InvalidOtp,

    #[error("profile not found")]
    MissingProfile,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl AccountError {
    pub fn user_message(&self) -> String {
        match self {
            AccountError::Invalid(msg) => msg.clone(),
            AccountError::InvalidOtp => "Invalid OTP".to_string(),
            AccountError::MissingProfile => "Your profile could not be loaded.".to_string(),
            AccountError::Upload(e) => e.user_message(),
            AccountError::Backend(BackendError::NotConfigured) => {
                "The backend is not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY.".to_string()
            }
            AccountError::Backend(BackendError::Api { status, message }) if *status < 500 => {
                message.clone()
            }
            AccountError::Backend(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Profile row for an identity that has none yet.
fn profile_from_identity(user: &AuthUser) -> NewProfile {
    let email = user.email.clone().unwrap_or_default();
    let username = if user.user_metadata.username.trim().is_empty() {
        email.split('@').next().unwrap_or_default().to_string()
    } else {
        user.user_metadata.username.trim().to_string()
    };
    NewProfile {
        id: user.id.clone(),
        email,
        username,
        full_name: user.user_metadata.full_name.trim().to_string(),
        bio: String::new(),
        profile_photo: String::new(),
        points: 0,
    }
}

/// Load the profile row, creating it from the identity's metadata when a
/// previous sign-up left the identity without one.
async fn ensure_profile(store: &dyn Store, cred: &Credential, user: &AuthUser) -> Option<Profile> {
    match store.get_profile(cred, &user.id).await {
        Ok(Some(profile)) => return Some(profile),
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Failed to load profile for {}: {}", user.id, e);
            return None;
        }
    }
    tracing::warn!("User {} has no profile row; creating one", user.id);
    match store.insert_profile(cred, &profile_from_identity(user)).await {
        Ok(profile) => Some(profile),
        Err(e) => {
            tracing::error!("Failed to create missing profile for {}: {}", user.id, e);
            None
        }
    }
}

/// Password sign-in. Returns the new session's cookie token.
pub async fn sign_in(
    backend: &Backend,
    sessions: &Mutex<SessionStore>,
    email: &str,
    password: &str,
) -> Result<String, AccountError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AccountError::Invalid(
            "Email and password are required.".into(),
        ));
    }

    let auth = backend.auth.sign_in_with_password(email, password).await?;
    let cred = Credential::User(auth.access_token.clone());
    let profile = ensure_profile(backend.store.as_ref(), &cred, &auth.user).await;

    let token = sessions.lock().await.create(&auth, profile);
    tracing::info!("User {} signed in", auth.user.id);
    Ok(token)
}

/// Fields of the sign-up form.
#[derive(Debug, Clone, Default)]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    pub username: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpResult {
    /// A code was emailed; the account is unusable until verified.
    VerificationRequired,
    /// Confirmation is off; the account can sign in right away.
    Ready,
}

/// Create the identity, then its profile row. A failed profile insert is
/// logged and healed on the next sign-in.
pub async fn sign_up(backend: &Backend, form: &SignUpForm) -> Result<SignUpResult, AccountError> {
    let email = form.email.trim();
    let username = form.username.trim();
    let full_name = form.full_name.trim();
    if email.is_empty() || username.is_empty() || full_name.is_empty() {
        return Err(AccountError::Invalid("All fields are required.".into()));
    }
    if form.password.len() < MIN_PASSWORD_LEN {
        return Err(AccountError::Invalid(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }

    let metadata = UserMetadata {
        username: username.to_string(),
        full_name: full_name.to_string(),
    };
    let outcome = backend.auth.sign_up(email, &form.password, &metadata).await?;

    if let Some(ref user) = outcome.user {
        let cred = outcome
            .session
            .as_ref()
            .map(|s| Credential::User(s.access_token.clone()))
            .unwrap_or(Credential::Anon);
        let row = NewProfile {
            email: email.to_string(),
            ..profile_from_identity(user)
        };
        match backend.store.insert_profile(&cred, &row).await {
            Ok(_) => tracing::info!("Created profile for {}", user.id),
            Err(e) => tracing::error!("Profile insert after sign-up failed for {}: {}", user.id, e),
        }
    } else {
        tracing::warn!("Sign-up for {} returned no user", email);
    }

    Ok(if outcome.session.is_some() {
        SignUpResult::Ready
    } else {
        SignUpResult::VerificationRequired
    })
}

/// Confirm a sign-up with the emailed six-digit code.
pub async fn verify_otp(backend: &Backend, email: &str, code: &str) -> Result<(), AccountError> {
    let code = code.trim();
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AccountError::InvalidOtp);
    }
    match backend.auth.verify_otp(email.trim(), code).await {
        Ok(session) => {
            tracing::info!("User {} verified", session.user.id);
            Ok(())
        }
        Err(BackendError::NotConfigured) => Err(BackendError::NotConfigured.into()),
        Err(e) => {
            tracing::warn!("OTP verification failed for {}: {}", email, e);
            Err(AccountError::InvalidOtp)
        }
    }
}

/// Drop the local session and revoke the remote one. Remote errors are only
/// logged.
pub async fn sign_out(backend: &Backend, sessions: &Mutex<SessionStore>, token: &str) {
    let Some(session) = sessions.lock().await.remove(token) else {
        return;
    };
    if let Err(e) = backend.auth.sign_out(&session.access_token).await {
        tracing::warn!("Remote sign-out failed for {}: {}", session.user_id, e);
    }
    tracing::info!("User {} signed out", session.user_id);
}

/// Reload the profile row and refresh every cached copy.
pub async fn current_profile(
    backend: &Backend,
    sessions: &Mutex<SessionStore>,
    session: &Session,
) -> Result<Profile, AccountError> {
    let viewer = session.viewer();
    match backend
        .store
        .get_profile(&viewer.credential, &viewer.user_id)
        .await?
    {
        Some(profile) => {
            sessions.lock().await.set_profile(profile.clone());
            Ok(profile)
        }
        None => session.profile.clone().ok_or(AccountError::MissingProfile),
    }
}

/// Fields of the profile edit form.
#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub username: String,
    pub full_name: String,
    pub bio: String,
}

pub async fn update_profile(
    backend: &Backend,
    sessions: &Mutex<SessionStore>,
    session: &Session,
    form: &ProfileForm,
) -> Result<Profile, AccountError> {
    let username = form.username.trim();
    if username.is_empty() {
        return Err(AccountError::Invalid("Username cannot be empty.".into()));
    }
    let update = ProfileUpdate {
        username: Some(username.to_string()),
        full_name: Some(form.full_name.trim().to_string()),
        bio: Some(form.bio.trim().to_string()),
        ..Default::default()
    };
    apply_update(backend, sessions, &session.viewer(), &update).await
}

/// Upload a new avatar, overwriting the old one, and point the profile at it.
pub async fn upload_profile_photo(
    backend: &Backend,
    sessions: &Mutex<SessionStore>,
    session: &Session,
    file: &MediaFile,
) -> Result<Profile, AccountError> {
    let viewer = session.viewer();
    let path = uploads::avatar_path(&viewer.user_id, &file.extension());
    let url = uploads::upload(
        backend.objects.as_ref(),
        &viewer.credential,
        &uploads::PROFILES,
        &path,
        file,
        true,
    )
    .await?;
    let update = ProfileUpdate {
        profile_photo: Some(url),
        ..Default::default()
    };
    apply_update(backend, sessions, &viewer, &update).await
}

async fn apply_update(
    backend: &Backend,
    sessions: &Mutex<SessionStore>,
    viewer: &Viewer,
    update: &ProfileUpdate,
) -> Result<Profile, AccountError> {
    backend
        .store
        .update_profile(&viewer.credential, &viewer.user_id, update)
        .await?;
    let profile = backend
        .store
        .get_profile(&viewer.credential, &viewer.user_id)
        .await?
        .ok_or(AccountError::MissingProfile)?;
    sessions.lock().await.set_profile(profile.clone());
    tracing::info!("Updated profile for {}", viewer.user_id);
    Ok(profile)
}

/// Delete the profile row, then the identity, then every session of the user.
pub async fn delete_account(
    backend: &Backend,
    sessions: &Mutex<SessionStore>,
    session: &Session,
    confirmation: &str,
) -> Result<(), AccountError> {
    if confirmation.trim() != DELETE_CONFIRMATION {
        return Err(AccountError::Invalid(format!(
            "Type {DELETE_CONFIRMATION} to confirm."
        )));
    }
    let viewer = session.viewer();
    backend
        .store
        .delete_profile(&viewer.credential, &viewer.user_id)
        .await?;
    tracing::info!("Deleted profile row for {}", viewer.user_id);

    if let Err(e) = backend.auth.delete_user(&viewer.user_id).await {
        tracing::error!(
            "Profile for {} deleted but identity removal failed: {}",
            viewer.user_id,
            e
        );
    }
    if let Err(e) = backend.auth.sign_out(&session.access_token).await {
        tracing::warn!("Remote sign-out failed for {}: {}", viewer.user_id, e);
    }
    let dropped = sessions.lock().await.remove_user(&viewer.user_id);
    tracing::info!("Account {} deleted, {} sessions dropped", viewer.user_id, dropped);
    Ok(())
}

/// Delete every row of every table, dependents first.
pub async fn reset_app(backend: &Backend, confirmation: &str) -> Result<(), AccountError> {
    if confirmation != RESET_CONFIRMATION {
        return Err(AccountError::Invalid(format!(
            "Refusing to reset without --confirm {RESET_CONFIRMATION}"
        )));
    }
    for table in Table::RESET_ORDER {
        backend
            .store
            .clear_table(&Credential::Service, table)
            .await?;
        tracing::warn!("Cleared table {}", table.as_str());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str, email: Option<&str>) -> AuthUser {
        AuthUser {
            id: "u1".into(),
            email: email.map(str::to_string),
            user_metadata: UserMetadata {
                username: username.into(),
                full_name: " Ada Lovelace ".into(),
            },
            email_confirmed_at: None,
        }
    }

    #[test]
    fn profile_from_identity_uses_metadata() {
        let row = profile_from_identity(&user("ada", Some("ada@example.com")));
        assert_eq!(row.username, "ada");
        assert_eq!(row.full_name, "Ada Lovelace");
        assert_eq!(row.points, 0);
    }

    #[test]
    fn profile_from_identity_falls_back_to_email() {
        let row = profile_from_identity(&user("", Some("grace@example.com")));
        assert_eq!(row.username, "grace");
    }

    #[tokio::test]
    async fn malformed_codes_never_reach_the_backend() {
        let backend = Backend::memory();
        for code in ["12345", "abcdef", "1234567"] {
            assert!(matches!(
                verify_otp(&backend, "ada@example.com", code).await,
                Err(AccountError::InvalidOtp)
            ));
        }
    }

    #[tokio::test]
    async fn reset_requires_exact_confirmation() {
        let backend = Backend::memory();
        assert!(reset_app(&backend, "reset").await.is_err());
        assert!(reset_app(&backend, "RESET").await.is_ok());
    }

    #[test]
    fn api_messages_reach_the_user() {
        let err = AccountError::Backend(BackendError::Api {
            status: 400,
            message: "Invalid login credentials".into(),
        });
        assert_eq!(err.user_message(), "Invalid login credentials");
        assert_eq!(AccountError::InvalidOtp.user_message(), "Invalid OTP");
    }
}
