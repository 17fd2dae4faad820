//! In-process backend used by tests and `--memory` mode.
//!
//! Mirrors the platform's observable behaviour closely enough for the domain
//! modules: unique usernames, email confirmation with a six-digit code,
//! bucket size and MIME limits, and foreign-key cascades on user deletion.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::backend::{
    AuthApi, AuthSession, AuthUser, BackendError, BackendResult, Bucket, Credential, ObjectInfo,
    ObjectStore, SignUpOutcome, Store, Table, UserMetadata,
};
use crate::models::{
    Action, AuthorSummary, CommentWithAuthor, Event, EventParticipant, EventSummary,
    EventWithCreator, LeaderboardRow, LikeRef, NewAction, NewComment, NewEvent, NewPost,
    NewProfile, Post, PostLike, PostWithRelations, Profile, ProfileUpdate,
};

const PUBLIC_BASE: &str = "http://memory.local/storage/v1/object/public";

struct Identity {
    user: AuthUser,
    password: String,
    otp: Option<String>,
}

struct CommentRow {
    id: String,
    post_id: String,
    user_id: String,
    content: String,
    created_at: DateTime<Utc>,
}

struct StoredObject {
    bytes: Bytes,
    content_type: String,
}

#[derive(Default)]
struct State {
    profiles: Vec<Profile>,
    posts: Vec<Post>,
    likes: Vec<PostLike>,
    comments: Vec<CommentRow>,
    actions: Vec<Action>,
    events: Vec<Event>,
    participants: Vec<EventParticipant>,
    identities: Vec<Identity>,
    tokens: HashMap<String, String>,
    buckets: Vec<Bucket>,
    objects: HashMap<String, HashMap<String, StoredObject>>,
    denied: HashSet<&'static str>,
    upload_failure: Option<(u16, String)>,
}

impl State {
    fn author(&self, user_id: &str) -> Option<AuthorSummary> {
        self.profiles
            .iter()
            .find(|p| p.id == user_id)
            .map(AuthorSummary::from)
    }

    fn check_write(&self, table: Table) -> BackendResult<()> {
        if self.denied.contains(table.as_str()) {
            return Err(BackendError::Api {
                status: 403,
                message: format!(
                    "new row violates row-level security policy for table \"{}\"",
                    table.as_str()
                ),
            });
        }
        Ok(())
    }

    fn issue_session(&mut self, user: AuthUser) -> AuthSession {
        let token = Uuid::now_v7().simple().to_string();
        self.tokens.insert(token.clone(), user.id.clone());
        AuthSession {
            access_token: token,
            refresh_token: None,
            expires_in: Some(3600),
            user,
        }
    }
}

fn new_id() -> String {
    Uuid::now_v7().to_string()
}

fn api_error(status: u16, message: &str) -> BackendError {
    BackendError::Api {
        status,
        message: message.to_string(),
    }
}

/// Newest first; ties keep the later insert first.
fn newest_first<T>(
    rows: impl DoubleEndedIterator<Item = T>,
    key: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let mut rows: Vec<T> = rows.rev().collect();
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-write.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The pending confirmation code for an unverified account.
    pub fn otp_for(&self, email: &str) -> Option<String> {
        self.lock()
            .identities
            .iter()
            .find(|i| i.user.email.as_deref() == Some(email))
            .and_then(|i| i.otp.clone())
    }

    pub fn is_verified(&self, email: &str) -> bool {
        self.lock()
            .identities
            .iter()
            .any(|i| i.user.email.as_deref() == Some(email) && i.user.email_confirmed_at.is_some())
    }

    pub fn has_identity(&self, user_id: &str) -> bool {
        self.lock().identities.iter().any(|i| i.user.id == user_id)
    }

    /// Make writes to `table` fail the way a row-level policy would.
    pub fn deny_writes(&self, table: Table) {
        self.lock().denied.insert(table.as_str());
    }

    pub fn allow_writes(&self, table: Table) {
        self.lock().denied.remove(table.as_str());
    }

    /// Make every upload fail with the given platform status and message.
    pub fn fail_uploads(&self, status: u16, message: &str) {
        self.lock().upload_failure = Some((status, message.to_string()));
    }

    /// Move an action's timestamp, for windowed queries.
    pub fn backdate_action(&self, action_id: &str, at: DateTime<Utc>) {
        if let Some(action) = self.lock().actions.iter_mut().find(|a| a.id == action_id) {
            action.created_at = at;
        }
    }

    /// Set a profile's stored total without touching the ledger.
    pub fn force_points(&self, user_id: &str, points: i64) {
        if let Some(profile) = self.lock().profiles.iter_mut().find(|p| p.id == user_id) {
            profile.points = points;
        }
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<(Bytes, String)> {
        self.lock()
            .objects
            .get(bucket)
            .and_then(|objects| objects.get(path))
            .map(|o| (o.bytes.clone(), o.content_type.clone()))
    }

    pub fn row_count(&self, table: Table) -> usize {
        let state = self.lock();
        match table {
            Table::Users => state.profiles.len(),
            Table::Posts => state.posts.len(),
            Table::Actions => state.actions.len(),
            Table::Events => state.events.len(),
            Table::EventParticipants => state.participants.len(),
            Table::PostLikes => state.likes.len(),
            Table::PostComments => state.comments.len(),
        }
    }
}

#[async_trait]
impl Store for MemoryBackend {
    async fn get_profile(
        &self,
        _cred: &Credential,
        user_id: &str,
    ) -> BackendResult<Option<Profile>> {
        Ok(self.lock().profiles.iter().find(|p| p.id == user_id).cloned())
    }

    async fn insert_profile(&self, _cred: &Credential, row: &NewProfile) -> BackendResult<Profile> {
        let mut state = self.lock();
        state.check_write(Table::Users)?;
        if state.profiles.iter().any(|p| p.id == row.id) {
            return Err(api_error(
                409,
                "duplicate key value violates unique constraint \"users_pkey\"",
            ));
        }
        if state.profiles.iter().any(|p| p.username == row.username) {
            return Err(api_error(
                409,
                "duplicate key value violates unique constraint \"users_username_key\"",
            ));
        }
        let profile = Profile {
            id: row.id.clone(),
            email: row.email.clone(),
            username: row.username.clone(),
            full_name: row.full_name.clone(),
            bio: row.bio.clone(),
            profile_photo: row.profile_photo.clone(),
            points: row.points,
            created_at: Utc::now(),
            updated_at: None,
        };
        state.profiles.push(profile.clone());
        Ok(profile)
    }

    async fn update_profile(
        &self,
        _cred: &Credential,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> BackendResult<()> {
        let mut state = self.lock();
        state.check_write(Table::Users)?;
        if let Some(ref username) = update.username {
            if state
                .profiles
                .iter()
                .any(|p| p.id != user_id && &p.username == username)
            {
                return Err(api_error(
                    409,
                    "duplicate key value violates unique constraint \"users_username_key\"",
                ));
            }
        }
        if let Some(profile) = state.profiles.iter_mut().find(|p| p.id == user_id) {
            update.apply_to(profile);
            profile.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_profile(&self, _cred: &Credential, user_id: &str) -> BackendResult<()> {
        let mut state = self.lock();
        state.check_write(Table::Users)?;
        let owned_posts: HashSet<String> = state
            .posts
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.id.clone())
            .collect();
        let owned_events: HashSet<String> = state
            .events
            .iter()
            .filter(|e| e.created_by == user_id)
            .map(|e| e.id.clone())
            .collect();
        state
            .comments
            .retain(|c| c.user_id != user_id && !owned_posts.contains(&c.post_id));
        state
            .likes
            .retain(|l| l.user_id != user_id && !owned_posts.contains(&l.post_id));
        state
            .participants
            .retain(|p| p.user_id != user_id && !owned_events.contains(&p.event_id));
        state.events.retain(|e| e.created_by != user_id);
        state.actions.retain(|a| a.user_id != user_id);
        state.posts.retain(|p| p.user_id != user_id);
        state.profiles.retain(|p| p.id != user_id);
        Ok(())
    }

    async fn top_profiles(
        &self,
        _cred: &Credential,
        limit: usize,
    ) -> BackendResult<Vec<LeaderboardRow>> {
        let state = self.lock();
        let mut rows: Vec<LeaderboardRow> = state
            .profiles
            .iter()
            .map(|p| LeaderboardRow {
                id: p.id.clone(),
                username: p.username.clone(),
                full_name: p.full_name.clone(),
                points: p.points,
                profile_photo: p.photo_url().map(str::to_string),
            })
            .collect();
        rows.sort_by(|a, b| b.points.cmp(&a.points));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn profiles_by_ids(
        &self,
        _cred: &Credential,
        ids: &[String],
    ) -> BackendResult<Vec<LeaderboardRow>> {
        let state = self.lock();
        Ok(state
            .profiles
            .iter()
            .filter(|p| ids.contains(&p.id))
            .map(|p| LeaderboardRow {
                id: p.id.clone(),
                username: p.username.clone(),
                full_name: p.full_name.clone(),
                points: p.points,
                profile_photo: p.photo_url().map(str::to_string),
            })
            .collect())
    }

    async fn list_feed(
        &self,
        _cred: &Credential,
        category: Option<&str>,
    ) -> BackendResult<Vec<PostWithRelations>> {
        let state = self.lock();
        let posts = newest_first(
            state
                .posts
                .iter()
                .filter(|p| category.map_or(true, |c| p.category == c))
                .cloned(),
            |p| p.created_at,
        );
        Ok(posts
            .into_iter()
            .map(|post| {
                let post_likes = state
                    .likes
                    .iter()
                    .filter(|l| l.post_id == post.id)
                    .map(|l| LikeRef {
                        id: l.id.clone(),
                        user_id: l.user_id.clone(),
                    })
                    .collect();
                let mut post_comments: Vec<CommentWithAuthor> = state
                    .comments
                    .iter()
                    .filter(|c| c.post_id == post.id)
                    .map(|c| CommentWithAuthor {
                        id: c.id.clone(),
                        content: c.content.clone(),
                        created_at: c.created_at,
                        author: state.author(&c.user_id),
                    })
                    .collect();
                post_comments.sort_by_key(|c| c.created_at);
                PostWithRelations {
                    author: state.author(&post.user_id),
                    post,
                    post_likes,
                    post_comments,
                }
            })
            .collect())
    }

    async fn list_user_posts(&self, _cred: &Credential, user_id: &str) -> BackendResult<Vec<Post>> {
        let state = self.lock();
        Ok(newest_first(
            state.posts.iter().filter(|p| p.user_id == user_id).cloned(),
            |p| p.created_at,
        ))
    }

    async fn count_user_posts(&self, _cred: &Credential, user_id: &str) -> BackendResult<u64> {
        let state = self.lock();
        Ok(state.posts.iter().filter(|p| p.user_id == user_id).count() as u64)
    }

    async fn insert_post(&self, _cred: &Credential, row: &NewPost) -> BackendResult<Post> {
        let mut state = self.lock();
        state.check_write(Table::Posts)?;
        let post = Post {
            id: new_id(),
            user_id: row.user_id.clone(),
            caption: row.caption.clone(),
            media_url: Some(row.media_url.clone()),
            media_type: Some(row.media_type),
            category: row.category.clone(),
            points_awarded: row.points_awarded,
            created_at: Utc::now(),
        };
        state.posts.push(post.clone());
        Ok(post)
    }

    async fn delete_post(
        &self,
        _cred: &Credential,
        post_id: &str,
        owner_id: &str,
    ) -> BackendResult<u64> {
        let mut state = self.lock();
        state.check_write(Table::Posts)?;
        let before = state.posts.len();
        state
            .posts
            .retain(|p| !(p.id == post_id && p.user_id == owner_id));
        let removed = (before - state.posts.len()) as u64;
        if removed > 0 {
            state.likes.retain(|l| l.post_id != post_id);
            state.comments.retain(|c| c.post_id != post_id);
            for action in state.actions.iter_mut() {
                if action.post_id.as_deref() == Some(post_id) {
                    action.post_id = None;
                }
            }
        }
        Ok(removed)
    }

    async fn list_likes(&self, _cred: &Credential, post_id: &str) -> BackendResult<Vec<PostLike>> {
        let state = self.lock();
        Ok(state
            .likes
            .iter()
            .filter(|l| l.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn insert_like(
        &self,
        _cred: &Credential,
        post_id: &str,
        user_id: &str,
    ) -> BackendResult<()> {
        let mut state = self.lock();
        state.check_write(Table::PostLikes)?;
        if !state.posts.iter().any(|p| p.id == post_id) {
            return Err(api_error(
                409,
                "insert or update on table \"post_likes\" violates foreign key constraint",
            ));
        }
        if state
            .likes
            .iter()
            .any(|l| l.post_id == post_id && l.user_id == user_id)
        {
            return Err(api_error(
                409,
                "duplicate key value violates unique constraint \"post_likes_post_id_user_id_key\"",
            ));
        }
        state.likes.push(PostLike {
            id: new_id(),
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
            created_at: Some(Utc::now()),
        });
        Ok(())
    }

    async fn delete_like(&self, _cred: &Credential, like_id: &str) -> BackendResult<()> {
        let mut state = self.lock();
        state.check_write(Table::PostLikes)?;
        state.likes.retain(|l| l.id != like_id);
        Ok(())
    }

    async fn insert_comment(&self, _cred: &Credential, row: &NewComment) -> BackendResult<()> {
        let mut state = self.lock();
        state.check_write(Table::PostComments)?;
        if !state.posts.iter().any(|p| p.id == row.post_id) {
            return Err(api_error(
                409,
                "insert or update on table \"post_comments\" violates foreign key constraint",
            ));
        }
        state.comments.push(CommentRow {
            id: new_id(),
            post_id: row.post_id.clone(),
            user_id: row.user_id.clone(),
            content: row.content.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn insert_action(&self, _cred: &Credential, row: &NewAction) -> BackendResult<Action> {
        let mut state = self.lock();
        state.check_write(Table::Actions)?;
        let action = Action {
            id: new_id(),
            user_id: row.user_id.clone(),
            action_type: row.action_type.clone(),
            description: row.description.clone(),
            points: row.points,
            post_id: row.post_id.clone(),
            created_at: Utc::now(),
        };
        state.actions.push(action.clone());
        Ok(action)
    }

    async fn list_actions(
        &self,
        _cred: &Credential,
        user_id: &str,
        limit: Option<usize>,
    ) -> BackendResult<Vec<Action>> {
        let state = self.lock();
        let mut actions = newest_first(
            state.actions.iter().filter(|a| a.user_id == user_id).cloned(),
            |a| a.created_at,
        );
        if let Some(limit) = limit {
            actions.truncate(limit);
        }
        Ok(actions)
    }

    async fn count_actions_since(
        &self,
        _cred: &Credential,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> BackendResult<u64> {
        let state = self.lock();
        Ok(state
            .actions
            .iter()
            .filter(|a| a.user_id == user_id && a.created_at >= since)
            .count() as u64)
    }

    async fn ledger_total(&self, _cred: &Credential, user_id: &str) -> BackendResult<i64> {
        let state = self.lock();
        Ok(state
            .actions
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.points)
            .sum())
    }

    async fn actions_since(
        &self,
        _cred: &Credential,
        since: DateTime<Utc>,
    ) -> BackendResult<Vec<Action>> {
        let state = self.lock();
        Ok(state
            .actions
            .iter()
            .filter(|a| a.created_at >= since)
            .cloned()
            .collect())
    }

    async fn list_events_from(
        &self,
        _cred: &Credential,
        from: DateTime<Utc>,
    ) -> BackendResult<Vec<EventWithCreator>> {
        let state = self.lock();
        let mut events: Vec<EventWithCreator> = state
            .events
            .iter()
            .filter(|e| e.event_date >= from)
            .map(|e| EventWithCreator {
                creator: state.author(&e.created_by),
                event: e.clone(),
            })
            .collect();
        events.sort_by_key(|e| e.event.event_date);
        Ok(events)
    }

    async fn get_event(&self, _cred: &Credential, event_id: &str) -> BackendResult<Option<Event>> {
        Ok(self.lock().events.iter().find(|e| e.id == event_id).cloned())
    }

    async fn insert_event(&self, _cred: &Credential, row: &NewEvent) -> BackendResult<Event> {
        let mut state = self.lock();
        state.check_write(Table::Events)?;
        let event = Event {
            id: new_id(),
            title: row.title.clone(),
            description: row.description.clone(),
            location: row.location.clone(),
            event_date: row.event_date,
            created_by: row.created_by.clone(),
            max_participants: row.max_participants,
            created_at: Utc::now(),
        };
        state.events.push(event.clone());
        Ok(event)
    }

    async fn event_ids_before(
        &self,
        _cred: &Credential,
        cutoff: DateTime<Utc>,
    ) -> BackendResult<Vec<String>> {
        let state = self.lock();
        Ok(state
            .events
            .iter()
            .filter(|e| e.event_date < cutoff)
            .map(|e| e.id.clone())
            .collect())
    }

    async fn delete_participants_of(
        &self,
        _cred: &Credential,
        event_ids: &[String],
    ) -> BackendResult<u64> {
        let mut state = self.lock();
        state.check_write(Table::EventParticipants)?;
        let before = state.participants.len();
        state.participants.retain(|p| !event_ids.contains(&p.event_id));
        Ok((before - state.participants.len()) as u64)
    }

    async fn delete_events(&self, _cred: &Credential, event_ids: &[String]) -> BackendResult<u64> {
        let mut state = self.lock();
        state.check_write(Table::Events)?;
        if state
            .participants
            .iter()
            .any(|p| event_ids.contains(&p.event_id))
        {
            return Err(api_error(
                409,
                "update or delete on table \"events\" violates foreign key constraint on table \"event_participants\"",
            ));
        }
        let before = state.events.len();
        state.events.retain(|e| !event_ids.contains(&e.id));
        Ok((before - state.events.len()) as u64)
    }

    async fn count_participants(&self, _cred: &Credential, event_id: &str) -> BackendResult<u64> {
        let state = self.lock();
        Ok(state
            .participants
            .iter()
            .filter(|p| p.event_id == event_id)
            .count() as u64)
    }

    async fn is_participant(
        &self,
        _cred: &Credential,
        event_id: &str,
        user_id: &str,
    ) -> BackendResult<bool> {
        let state = self.lock();
        Ok(state
            .participants
            .iter()
            .any(|p| p.event_id == event_id && p.user_id == user_id))
    }

    async fn insert_participant(
        &self,
        _cred: &Credential,
        event_id: &str,
        user_id: &str,
    ) -> BackendResult<()> {
        let mut state = self.lock();
        state.check_write(Table::EventParticipants)?;
        if !state.events.iter().any(|e| e.id == event_id) {
            return Err(api_error(
                409,
                "insert or update on table \"event_participants\" violates foreign key constraint",
            ));
        }
        if state
            .participants
            .iter()
            .any(|p| p.event_id == event_id && p.user_id == user_id)
        {
            return Err(api_error(
                409,
                "duplicate key value violates unique constraint \"event_participants_event_id_user_id_key\"",
            ));
        }
        state.participants.push(EventParticipant {
            id: new_id(),
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
            joined_at: Some(Utc::now()),
        });
        Ok(())
    }

    async fn delete_participant(
        &self,
        _cred: &Credential,
        event_id: &str,
        user_id: &str,
    ) -> BackendResult<()> {
        let mut state = self.lock();
        state.check_write(Table::EventParticipants)?;
        state
            .participants
            .retain(|p| !(p.event_id == event_id && p.user_id == user_id));
        Ok(())
    }

    async fn joined_events(
        &self,
        _cred: &Credential,
        user_id: &str,
    ) -> BackendResult<Vec<EventSummary>> {
        let state = self.lock();
        Ok(state
            .participants
            .iter()
            .filter(|p| p.user_id == user_id)
            .filter_map(|p| state.events.iter().find(|e| e.id == p.event_id))
            .map(|e| EventSummary {
                id: e.id.clone(),
                title: e.title.clone(),
                event_date: e.event_date,
                location: e.location.clone(),
            })
            .collect())
    }

    async fn clear_table(&self, _cred: &Credential, table: Table) -> BackendResult<()> {
        let mut state = self.lock();
        state.check_write(table)?;
        match table {
            Table::Users => state.profiles.clear(),
            Table::Posts => state.posts.clear(),
            Table::Actions => state.actions.clear(),
            Table::Events => state.events.clear(),
            Table::EventParticipants => state.participants.clear(),
            Table::PostLikes => state.likes.clear(),
            Table::PostComments => state.comments.clear(),
        }
        Ok(())
    }

    async fn exec_sql(&self, _cred: &Credential, sql: &str) -> BackendResult<()> {
        tracing::debug!("Ignoring {} bytes of SQL in memory backend", sql.len());
        Ok(())
    }
}

#[async_trait]
impl AuthApi for MemoryBackend {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<AuthSession> {
        let mut state = self.lock();
        let identity = state
            .identities
            .iter()
            .find(|i| i.user.email.as_deref() == Some(email) && i.password == password)
            .ok_or_else(|| api_error(400, "Invalid login credentials"))?;
        if identity.user.email_confirmed_at.is_none() {
            return Err(api_error(400, "Email not confirmed"));
        }
        let user = identity.user.clone();
        Ok(state.issue_session(user))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> BackendResult<SignUpOutcome> {
        if password.len() < 6 {
            return Err(api_error(422, "Password should be at least 6 characters"));
        }
        if !email.contains('@') {
            return Err(api_error(400, "Unable to validate email address: invalid format"));
        }
        let mut state = self.lock();
        if state
            .identities
            .iter()
            .any(|i| i.user.email.as_deref() == Some(email))
        {
            return Err(api_error(422, "User already registered"));
        }
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let user = AuthUser {
            id: new_id(),
            email: Some(email.to_string()),
            user_metadata: metadata.clone(),
            email_confirmed_at: None,
        };
        tracing::debug!("Confirmation code for {}: {}", email, code);
        state.identities.push(Identity {
            user: user.clone(),
            password: password.to_string(),
            otp: Some(code),
        });
        Ok(SignUpOutcome {
            user: Some(user),
            session: None,
        })
    }

    async fn verify_otp(&self, email: &str, token: &str) -> BackendResult<AuthSession> {
        let mut state = self.lock();
        let identity = state
            .identities
            .iter_mut()
            .find(|i| i.user.email.as_deref() == Some(email) && i.otp.as_deref() == Some(token))
            .ok_or_else(|| api_error(403, "Token has expired or is invalid"))?;
        identity.otp = None;
        identity.user.email_confirmed_at = Some(Utc::now());
        let user = identity.user.clone();
        Ok(state.issue_session(user))
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        self.lock().tokens.remove(access_token);
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> BackendResult<()> {
        let mut state = self.lock();
        let before = state.identities.len();
        state.identities.retain(|i| i.user.id != user_id);
        if state.identities.len() == before {
            return Err(api_error(404, "User not found"));
        }
        state.tokens.retain(|_, owner| owner != user_id);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn list_buckets(&self) -> BackendResult<Vec<Bucket>> {
        Ok(self.lock().buckets.clone())
    }

    async fn create_bucket(&self, bucket: &Bucket) -> BackendResult<()> {
        let mut state = self.lock();
        if state.buckets.iter().any(|b| b.id == bucket.id) {
            return Err(api_error(409, "The resource already exists"));
        }
        state.buckets.push(bucket.clone());
        Ok(())
    }

    async fn upload(
        &self,
        _cred: &Credential,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> BackendResult<()> {
        let mut state = self.lock();
        if let Some((status, ref message)) = state.upload_failure {
            return Err(api_error(status, message));
        }
        let config = state
            .buckets
            .iter()
            .find(|b| b.id == bucket)
            .cloned()
            .ok_or_else(|| api_error(404, "Bucket not found"))?;
        if let Some(limit) = config.file_size_limit {
            if bytes.len() as u64 > limit {
                return Err(api_error(413, "The object exceeded the maximum allowed size"));
            }
        }
        if let Some(ref allowed) = config.allowed_mime_types {
            if !allowed.iter().any(|m| m == content_type) {
                return Err(api_error(
                    415,
                    &format!("mime type {content_type} is not supported"),
                ));
            }
        }
        let objects = state.objects.entry(bucket.to_string()).or_default();
        if !upsert && objects.contains_key(path) {
            return Err(api_error(409, "The resource already exists"));
        }
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> BackendResult<Vec<ObjectInfo>> {
        let state = self.lock();
        if !state.buckets.iter().any(|b| b.id == bucket) {
            return Err(api_error(404, "Bucket not found"));
        }
        let mut names: Vec<ObjectInfo> = state
            .objects
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|name| name.starts_with(prefix))
                    .map(|name| ObjectInfo {
                        name: name.clone(),
                        id: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(names)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{PUBLIC_BASE}/{bucket}/{path}")
    }

    async fn probe(&self, url: &str) -> BackendResult<u16> {
        let Some(rest) = url.strip_prefix(PUBLIC_BASE) else {
            return Ok(404);
        };
        let Some((bucket, path)) = rest.trim_start_matches('/').split_once('/') else {
            return Ok(404);
        };
        let state = self.lock();
        let public = state.buckets.iter().any(|b| b.id == bucket && b.public);
        let exists = state
            .objects
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(path));
        Ok(match (exists, public) {
            (true, true) => 200,
            (true, false) => 400,
            _ => 404,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(username: &str) -> UserMetadata {
        UserMetadata {
            username: username.into(),
            full_name: String::new(),
        }
    }

    #[tokio::test]
    async fn unconfirmed_accounts_cannot_sign_in() {
        let backend = MemoryBackend::new();
        backend
            .sign_up("ada@example.com", "secret1", &metadata("ada"))
            .await
            .unwrap();

        let err = backend
            .sign_in_with_password("ada@example.com", "secret1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Email not confirmed"));

        let code = backend.otp_for("ada@example.com").unwrap();
        assert_eq!(code.len(), 6);
        backend.verify_otp("ada@example.com", &code).await.unwrap();
        assert!(backend
            .sign_in_with_password("ada@example.com", "secret1")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let backend = MemoryBackend::new();
        backend
            .sign_up("ada@example.com", "secret1", &metadata("ada"))
            .await
            .unwrap();
        let err = backend
            .sign_up("ada@example.com", "secret2", &metadata("ada2"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn upload_enforces_bucket_limits() {
        let backend = MemoryBackend::new();
        backend
            .create_bucket(&Bucket {
                id: "posts".into(),
                name: "posts".into(),
                public: true,
                file_size_limit: Some(4),
                allowed_mime_types: Some(vec!["image/png".into()]),
            })
            .await
            .unwrap();

        let err = backend
            .upload(&Credential::Anon, "posts", "a.png", Bytes::from_static(b"12345"), "image/png", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("maximum allowed size"));

        let err = backend
            .upload(&Credential::Anon, "posts", "a.gif", Bytes::from_static(b"12"), "image/gif", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mime type"));

        backend
            .upload(&Credential::Anon, "posts", "a.png", Bytes::from_static(b"12"), "image/png", false)
            .await
            .unwrap();
        let url = backend.public_url("posts", "a.png");
        assert_eq!(backend.probe(&url).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn deleting_events_with_participants_is_refused() {
        let backend = MemoryBackend::new();
        let cred = Credential::Anon;
        let event = backend
            .insert_event(
                &cred,
                &NewEvent {
                    title: "Beach clean".into(),
                    description: "Bring gloves".into(),
                    location: "North beach".into(),
                    event_date: Utc::now(),
                    created_by: "u1".into(),
                    max_participants: 10,
                },
            )
            .await
            .unwrap();
        backend.insert_participant(&cred, &event.id, "u2").await.unwrap();

        let ids = vec![event.id.clone()];
        assert!(backend.delete_events(&cred, &ids).await.is_err());
        assert_eq!(backend.delete_participants_of(&cred, &ids).await.unwrap(), 1);
        assert_eq!(backend.delete_events(&cred, &ids).await.unwrap(), 1);
    }
}
