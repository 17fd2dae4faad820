//! Home feed: posts with their author, likes and comments, plus the
//! operations that change them.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::backend::{BackendError, ObjectStore, Store};
use crate::models::{initial_of, MediaType, NewComment, NewPost, Post, PostWithRelations};
use crate::points::{self, ActionKind, POST_CREATED_POINTS};
use crate::session::Viewer;
use crate::uploads::{self, MediaFile, UploadError};

pub const OTHER_CATEGORY: &str = "Other";
pub const POST_CATEGORIES: [&str; 7] = [
    "Tree Planting",
    "Clean-Up",
    "Recycling",
    "Energy Saving",
    "Transportation",
    "Water Conservation",
    OTHER_CATEGORY,
];

const MAX_COMMENT_LEN: usize = 500;
const MAX_CUSTOM_CATEGORY_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{0}")]
    Invalid(String),

    #[error("post not found")]
    NotFound,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl FeedError {
    pub fn user_message(&self) -> String {
        match self {
            FeedError::Invalid(msg) => msg.clone(),
            FeedError::NotFound => "That post no longer exists.".to_string(),
            FeedError::Upload(e) => e.user_message(),
            FeedError::Backend(e) if e.is_access_denied() => {
                "You are not allowed to do that.".to_string()
            }
            FeedError::Backend(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Category chips above the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFilter {
    All,
    Recycling,
    Energy,
    Transportation,
    Water,
    Waste,
    Other,
}

impl FeedFilter {
    pub const ALL: [FeedFilter; 7] = [
        FeedFilter::All,
        FeedFilter::Recycling,
        FeedFilter::Energy,
        FeedFilter::Transportation,
        FeedFilter::Water,
        FeedFilter::Waste,
        FeedFilter::Other,
    ];

    /// Unknown keys show everything.
    pub fn parse(key: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|f| f.key() == key.trim().to_lowercase())
            .unwrap_or(FeedFilter::All)
    }

    pub fn key(&self) -> &'static str {
        match self {
            FeedFilter::All => "all",
            FeedFilter::Recycling => "recycling",
            FeedFilter::Energy => "energy",
            FeedFilter::Transportation => "transportation",
            FeedFilter::Water => "water",
            FeedFilter::Waste => "waste",
            FeedFilter::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeedFilter::All => "All",
            FeedFilter::Recycling => "Recycling",
            FeedFilter::Energy => "Energy",
            FeedFilter::Transportation => "Transportation",
            FeedFilter::Water => "Water",
            FeedFilter::Waste => "Waste",
            FeedFilter::Other => "Other",
        }
    }

    /// The stored category this filter matches by equality.
    fn category(&self) -> Option<&'static str> {
        match self {
            FeedFilter::All | FeedFilter::Other => None,
            FeedFilter::Recycling => Some("Recycling"),
            FeedFilter::Energy => Some("Energy Saving"),
            FeedFilter::Transportation => Some("Transportation"),
            FeedFilter::Water => Some("Water Conservation"),
            FeedFilter::Waste => Some("Clean-Up"),
        }
    }
}

pub struct FeedComment {
    pub author_name: String,
    pub content: String,
    pub created_at: String,
}

pub struct FeedItem {
    pub id: String,
    pub author_name: String,
    pub author_username: String,
    pub author_initial: String,
    pub author_photo: Option<String>,
    pub caption: String,
    pub category: String,
    pub media_url: Option<String>,
    pub is_video: bool,
    pub points_awarded: i64,
    pub created_at: String,
    pub like_count: usize,
    pub comment_count: usize,
    pub liked_by_me: bool,
    pub can_delete: bool,
    pub comments: Vec<FeedComment>,
}

impl FeedItem {
    fn from_row(row: PostWithRelations, viewer: &Viewer) -> Self {
        let (author_name, author_username, author_photo) = match row.author {
            Some(ref a) => (
                a.display_name().to_string(),
                a.username.clone(),
                a.profile_photo.clone().filter(|p| !p.is_empty()),
            ),
            None => ("Unknown".to_string(), String::new(), None),
        };
        let comments = row
            .post_comments
            .iter()
            .map(|c| FeedComment {
                author_name: c
                    .author
                    .as_ref()
                    .map(|a| a.display_name().to_string())
                    .unwrap_or_else(|| "Unknown".to_string()),
                content: c.content.clone(),
                created_at: format_relative_time(&c.created_at),
            })
            .collect();
        let post = row.post;
        Self {
            author_initial: initial_of(&author_name),
            author_name,
            author_username,
            author_photo,
            media_url: post.media().map(str::to_string),
            is_video: post.media_type == Some(MediaType::Video),
            created_at: format_relative_time(&post.created_at),
            like_count: row.post_likes.len(),
            comment_count: row.post_comments.len(),
            liked_by_me: row.post_likes.iter().any(|l| l.user_id == viewer.user_id),
            can_delete: post.user_id == viewer.user_id,
            comments,
            id: post.id,
            caption: post.caption,
            category: post.category,
            points_awarded: post.points_awarded,
        }
    }
}

pub async fn fetch_feed(
    store: &dyn Store,
    viewer: &Viewer,
    filter: FeedFilter,
) -> Result<Vec<FeedItem>, FeedError> {
    let mut rows = store.list_feed(&viewer.credential, filter.category()).await?;
    if filter == FeedFilter::Other {
        rows.retain(|r| !POST_CATEGORIES[..6].contains(&r.post.category.as_str()));
    }
    Ok(rows
        .into_iter()
        .map(|row| FeedItem::from_row(row, viewer))
        .collect())
}

/// Like or unlike. Returns whether the viewer now likes the post.
pub async fn toggle_like(
    store: &dyn Store,
    viewer: &Viewer,
    post_id: &str,
) -> Result<bool, FeedError> {
    let likes = store.list_likes(&viewer.credential, post_id).await?;
    match likes.iter().find(|l| l.user_id == viewer.user_id) {
        Some(like) => {
            store.delete_like(&viewer.credential, &like.id).await?;
            Ok(false)
        }
        None => {
            store
                .insert_like(&viewer.credential, post_id, &viewer.user_id)
                .await?;
            Ok(true)
        }
    }
}

pub async fn add_comment(
    store: &dyn Store,
    viewer: &Viewer,
    post_id: &str,
    content: &str,
) -> Result<(), FeedError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(FeedError::Invalid("Comment cannot be empty.".into()));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(FeedError::Invalid(format!(
            "Comment must be {MAX_COMMENT_LEN} characters or less."
        )));
    }
    store
        .insert_comment(
            &viewer.credential,
            &NewComment {
                post_id: post_id.to_string(),
                user_id: viewer.user_id.clone(),
                content: content.to_string(),
            },
        )
        .await?;
    Ok(())
}

/// Fields of the create-post form.
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub caption: String,
    pub category: String,
    pub custom_category: String,
    pub media: Option<MediaFile>,
}

/// The category to store: a listed one as-is, or the tidied free text for
/// `Other`.
pub fn resolve_category(category: &str, custom: &str) -> Result<String, FeedError> {
    let category = category.trim();
    if category == OTHER_CATEGORY {
        let custom: String = custom
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(MAX_CUSTOM_CATEGORY_LEN)
            .collect();
        if custom.is_empty() {
            return Err(FeedError::Invalid("Please specify your category.".into()));
        }
        return Ok(custom);
    }
    if POST_CATEGORIES.contains(&category) {
        Ok(category.to_string())
    } else {
        Err(FeedError::Invalid(format!("Unknown category: {category}")))
    }
}

/// Upload the media, insert the post, then credit the author.
pub async fn create_post(
    store: &dyn Store,
    objects: &dyn ObjectStore,
    viewer: &Viewer,
    draft: PostDraft,
) -> Result<Post, FeedError> {
    let caption = draft.caption.trim().to_string();
    if caption.is_empty() {
        return Err(FeedError::Invalid("Please write a caption.".into()));
    }
    let category = resolve_category(&draft.category, &draft.custom_category)?;

    let (media_url, media_type) = match draft.media {
        Some(ref file) => {
            let path = uploads::post_media_path(
                &viewer.user_id,
                Utc::now().timestamp_millis(),
                &file.extension(),
            );
            let url = uploads::upload(
                objects,
                &viewer.credential,
                &uploads::POSTS,
                &path,
                file,
                false,
            )
            .await?;
            (url, MediaType::from_mime(&file.content_type))
        }
        None => (String::new(), MediaType::Image),
    };

    let post = store
        .insert_post(
            &viewer.credential,
            &NewPost {
                user_id: viewer.user_id.clone(),
                caption,
                category: category.clone(),
                media_url,
                media_type,
                points_awarded: POST_CREATED_POINTS,
            },
        )
        .await?;
    tracing::info!("User {} created post {}", viewer.user_id, post.id);

    points::record_action(
        store,
        &viewer.credential,
        &viewer.user_id,
        ActionKind::PostCreated,
        format!("Posted about {}", category.to_lowercase()),
        Some(post.id.clone()),
    )
    .await?;

    Ok(post)
}

/// Debit the author, then remove the post.
pub async fn delete_post(
    store: &dyn Store,
    viewer: &Viewer,
    post_id: &str,
) -> Result<(), FeedError> {
    let owned = store
        .list_user_posts(&viewer.credential, &viewer.user_id)
        .await?;
    if !owned.iter().any(|p| p.id == post_id) {
        return Err(FeedError::NotFound);
    }

    points::record_action(
        store,
        &viewer.credential,
        &viewer.user_id,
        ActionKind::PostDeleted,
        "Deleted a post".to_string(),
        Some(post_id.to_string()),
    )
    .await?;

    match store
        .delete_post(&viewer.credential, post_id, &viewer.user_id)
        .await
    {
        Ok(0) => {
            tracing::error!(
                "Post {} was debited but not deleted; ledger is ahead of posts",
                post_id
            );
            Err(FeedError::NotFound)
        }
        Ok(_) => {
            tracing::info!("User {} deleted post {}", viewer.user_id, post_id);
            Ok(())
        }
        Err(e) => {
            tracing::error!(
                "Post {} was debited but delete failed: {}",
                post_id,
                e
            );
            Err(e.into())
        }
    }
}

pub fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let diff = Utc::now().signed_duration_since(*dt);

    let seconds = diff.num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = diff.num_minutes();
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }

    let hours = diff.num_hours();
    if hours < 24 {
        return format!("{}h ago", hours);
    }

    let days = diff.num_days();
    if days < 7 {
        return format!("{}d ago", days);
    }

    dt.format("%b %-d, %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_relative_time_steps() {
        assert_eq!(format_relative_time(&Utc::now()), "just now");
        let dt = Utc::now() - chrono::Duration::minutes(5);
        assert_eq!(format_relative_time(&dt), "5m ago");
        let dt = Utc::now() - chrono::Duration::hours(3);
        assert_eq!(format_relative_time(&dt), "3h ago");
        let dt = Utc::now() - chrono::Duration::days(2);
        assert_eq!(format_relative_time(&dt), "2d ago");
    }

    #[test]
    fn format_relative_time_old_date() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(format_relative_time(&dt), "Jan 15, 2025");
    }

    #[test]
    fn filter_parse_is_lenient() {
        assert_eq!(FeedFilter::parse("Energy"), FeedFilter::Energy);
        assert_eq!(FeedFilter::parse("nope"), FeedFilter::All);
        assert_eq!(FeedFilter::Water.category(), Some("Water Conservation"));
        assert_eq!(FeedFilter::All.category(), None);
    }

    #[test]
    fn other_category_uses_tidied_free_text() {
        assert_eq!(
            resolve_category("Other", "  Bike   repair ").unwrap(),
            "Bike repair"
        );
        assert!(resolve_category("Other", "   ").is_err());
        assert_eq!(
            resolve_category("Other", &"x".repeat(60)).unwrap().len(),
            MAX_CUSTOM_CATEGORY_LEN
        );
        assert_eq!(resolve_category("Recycling", "ignored").unwrap(), "Recycling");
        assert!(resolve_category("Knitting", "").is_err());
    }
}
