//! Seam between the app and the hosted backend platform.
//!
//! Rows, identity and object storage each sit behind an async trait. The
//! remote client implements all three over HTTP; the in-memory backend
//! implements them for tests and local development.

mod memory;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BackendConfig;
use crate::models::{
    Action, Event, EventSummary, EventWithCreator, LeaderboardRow, NewAction, NewComment,
    NewEvent, NewPost, NewProfile, Post, PostLike, PostWithRelations, Profile, ProfileUpdate,
};

pub use self::memory::MemoryBackend;
pub use self::remote::RemoteClient;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Backend is not configured")]
    NotConfigured,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BackendError {
    /// Row-level permission failures surface either as 401/403 or as a
    /// message mentioning row-level security.
    pub fn is_access_denied(&self) -> bool {
        match self {
            Self::Api { status, message } => {
                *status == 401
                    || *status == 403
                    || message.to_lowercase().contains("row-level security")
            }
            _ => false,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Which key a request is made with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Public API key only.
    Anon,
    /// A signed-in user's access token.
    User(String),
    /// Service key for admin and maintenance work.
    Service,
}

/// Collections owned by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Users,
    Posts,
    Actions,
    Events,
    EventParticipants,
    PostLikes,
    PostComments,
}

impl Table {
    /// Dependents first, so a full wipe never trips a foreign key.
    pub const RESET_ORDER: [Table; 7] = [
        Table::PostComments,
        Table::PostLikes,
        Table::EventParticipants,
        Table::Events,
        Table::Actions,
        Table::Posts,
        Table::Users,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Posts => "posts",
            Table::Actions => "actions",
            Table::Events => "events",
            Table::EventParticipants => "event_participants",
            Table::PostLikes => "post_likes",
            Table::PostComments => "post_comments",
        }
    }
}

/// Row operations, one method per query the pages issue.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_profile(&self, cred: &Credential, user_id: &str)
        -> BackendResult<Option<Profile>>;
    async fn insert_profile(&self, cred: &Credential, row: &NewProfile) -> BackendResult<Profile>;
    async fn update_profile(
        &self,
        cred: &Credential,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> BackendResult<()>;
    async fn delete_profile(&self, cred: &Credential, user_id: &str) -> BackendResult<()>;
    async fn top_profiles(&self, cred: &Credential, limit: usize)
        -> BackendResult<Vec<LeaderboardRow>>;
    async fn profiles_by_ids(
        &self,
        cred: &Credential,
        ids: &[String],
    ) -> BackendResult<Vec<LeaderboardRow>>;

    /// Posts newest first, joined to author, likes and comments.
    async fn list_feed(
        &self,
        cred: &Credential,
        category: Option<&str>,
    ) -> BackendResult<Vec<PostWithRelations>>;
    async fn list_user_posts(&self, cred: &Credential, user_id: &str) -> BackendResult<Vec<Post>>;
    async fn count_user_posts(&self, cred: &Credential, user_id: &str) -> BackendResult<u64>;
    async fn insert_post(&self, cred: &Credential, row: &NewPost) -> BackendResult<Post>;
    /// Deletes the post only when `owner_id` matches. Returns rows removed.
    async fn delete_post(&self, cred: &Credential, post_id: &str, owner_id: &str)
        -> BackendResult<u64>;

    async fn list_likes(&self, cred: &Credential, post_id: &str) -> BackendResult<Vec<PostLike>>;
    async fn insert_like(&self, cred: &Credential, post_id: &str, user_id: &str)
        -> BackendResult<()>;
    async fn delete_like(&self, cred: &Credential, like_id: &str) -> BackendResult<()>;
    async fn insert_comment(&self, cred: &Credential, row: &NewComment) -> BackendResult<()>;

    async fn insert_action(&self, cred: &Credential, row: &NewAction) -> BackendResult<Action>;
    /// A user's actions, newest first.
    async fn list_actions(
        &self,
        cred: &Credential,
        user_id: &str,
        limit: Option<usize>,
    ) -> BackendResult<Vec<Action>>;
    async fn count_actions_since(
        &self,
        cred: &Credential,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> BackendResult<u64>;
    /// Sum of every ledger entry for a user.
    async fn ledger_total(&self, cred: &Credential, user_id: &str) -> BackendResult<i64>;
    /// All users' actions created at or after `since`.
    async fn actions_since(&self, cred: &Credential, since: DateTime<Utc>)
        -> BackendResult<Vec<Action>>;

    /// Events at or after `from`, soonest first, with creator columns.
    async fn list_events_from(
        &self,
        cred: &Credential,
        from: DateTime<Utc>,
    ) -> BackendResult<Vec<EventWithCreator>>;
    async fn get_event(&self, cred: &Credential, event_id: &str) -> BackendResult<Option<Event>>;
    async fn insert_event(&self, cred: &Credential, row: &NewEvent) -> BackendResult<Event>;
    async fn event_ids_before(
        &self,
        cred: &Credential,
        cutoff: DateTime<Utc>,
    ) -> BackendResult<Vec<String>>;
    async fn delete_participants_of(&self, cred: &Credential, event_ids: &[String])
        -> BackendResult<u64>;
    async fn delete_events(&self, cred: &Credential, event_ids: &[String]) -> BackendResult<u64>;

    async fn count_participants(&self, cred: &Credential, event_id: &str) -> BackendResult<u64>;
    async fn is_participant(&self, cred: &Credential, event_id: &str, user_id: &str)
        -> BackendResult<bool>;
    async fn insert_participant(&self, cred: &Credential, event_id: &str, user_id: &str)
        -> BackendResult<()>;
    async fn delete_participant(&self, cred: &Credential, event_id: &str, user_id: &str)
        -> BackendResult<()>;
    /// Events a user joined, through the participants table.
    async fn joined_events(&self, cred: &Credential, user_id: &str)
        -> BackendResult<Vec<EventSummary>>;

    /// Deletes every row of a table.
    async fn clear_table(&self, cred: &Credential, table: Table) -> BackendResult<()>;
    /// Runs raw SQL through the `exec_sql` RPC.
    async fn exec_sql(&self, cred: &Credential, sql: &str) -> BackendResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUser,
}

/// Sign-up returns a user, and a session only when confirmation is off.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: Option<AuthUser>,
    pub session: Option<AuthSession>,
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> BackendResult<AuthSession>;
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> BackendResult<SignUpOutcome>;
    /// Confirms a signup with the emailed one-time code.
    async fn verify_otp(&self, email: &str, token: &str) -> BackendResult<AuthSession>;
    async fn sign_out(&self, access_token: &str) -> BackendResult<()>;
    /// Admin deletion of an identity. Needs the service key remotely.
    async fn delete_user(&self, user_id: &str) -> BackendResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub file_size_limit: Option<u64>,
    #[serde(default)]
    pub allowed_mime_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> BackendResult<Vec<Bucket>>;
    async fn create_bucket(&self, bucket: &Bucket) -> BackendResult<()>;
    async fn upload(
        &self,
        cred: &Credential,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> BackendResult<()>;
    async fn list_objects(&self, bucket: &str, prefix: &str) -> BackendResult<Vec<ObjectInfo>>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
    /// HEAD request against a public URL. Returns the status code.
    async fn probe(&self, url: &str) -> BackendResult<u16>;
}

/// The three backend interfaces, bundled for `AppState`.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn Store>,
    pub auth: Arc<dyn AuthApi>,
    pub objects: Arc<dyn ObjectStore>,
    configured: bool,
}

impl Backend {
    pub fn remote(config: &BackendConfig) -> anyhow::Result<Self> {
        let client = Arc::new(RemoteClient::new(config)?);
        let configured = client.is_configured();
        if !configured {
            tracing::warn!(
                "Backend URL {} is a placeholder; data calls are disabled",
                config.url
            );
        }
        Ok(Self {
            store: client.clone(),
            auth: client.clone(),
            objects: client,
            configured,
        })
    }

    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryBackend::new()))
    }

    pub fn from_memory(memory: Arc<MemoryBackend>) -> Self {
        Self {
            store: memory.clone(),
            auth: memory.clone(),
            objects: memory,
            configured: true,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }
}
