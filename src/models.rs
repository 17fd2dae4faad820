use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Treat a JSON `null` the same as a missing field for text columns the
/// backend leaves nullable but the app always renders as text.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// First character of a display name, uppercased, for avatar placeholders.
pub fn initial_of(name: &str) -> String {
    name.trim()
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "?".to_string())
}

// -- users --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub full_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub bio: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub profile_photo: String,
    #[serde(default)]
    pub points: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn photo_url(&self) -> Option<&str> {
        non_empty(&self.profile_photo)
    }

    /// Name shown on cards: full name, falling back to the username.
    pub fn display_name(&self) -> &str {
        non_empty(&self.full_name).unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub bio: String,
    pub profile_photo: String,
    pub points: i64,
}

/// Partial update of a profile row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_photo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(ref username) = self.username {
            profile.username = username.clone();
        }
        if let Some(ref full_name) = self.full_name {
            profile.full_name = full_name.clone();
        }
        if let Some(ref bio) = self.bio {
            profile.bio = bio.clone();
        }
        if let Some(ref photo) = self.profile_photo {
            profile.profile_photo = photo.clone();
        }
        if let Some(points) = self.points {
            profile.points = points;
        }
    }
}

/// Author columns embedded into posts, comments and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub username: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub full_name: String,
    #[serde(default)]
    pub profile_photo: Option<String>,
}

impl AuthorSummary {
    pub fn display_name(&self) -> &str {
        non_empty(&self.full_name).unwrap_or(&self.username)
    }
}

impl From<&Profile> for AuthorSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            username: profile.username.clone(),
            full_name: profile.full_name.clone(),
            profile_photo: profile.photo_url().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub id: String,
    pub username: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub full_name: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub profile_photo: Option<String>,
}

// -- posts --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("video/") {
            Self::Video
        } else {
            Self::Image
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub caption: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub category: String,
    #[serde(default)]
    pub points_awarded: i64,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn media(&self) -> Option<&str> {
        self.media_url.as_deref().and_then(non_empty)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPost {
    pub user_id: String,
    pub caption: String,
    pub category: String,
    pub media_url: String,
    pub media_type: MediaType,
    pub points_awarded: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostLike {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Like row as embedded in the feed select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeRef {
    pub id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub post_id: String,
    pub user_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentWithAuthor {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<AuthorSummary>,
}

/// A post joined to its author, likes and comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostWithRelations {
    #[serde(flatten)]
    pub post: Post,
    #[serde(default)]
    pub author: Option<AuthorSummary>,
    #[serde(default)]
    pub post_likes: Vec<LikeRef>,
    #[serde(default)]
    pub post_comments: Vec<CommentWithAuthor>,
}

// -- actions --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub user_id: String,
    pub action_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    pub points: i64,
    #[serde(default)]
    pub post_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAction {
    pub user_id: String,
    pub action_type: String,
    pub description: String,
    pub points: i64,
    pub post_id: Option<String>,
}

// -- events --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub location: String,
    pub event_date: DateTime<Utc>,
    pub created_by: String,
    pub max_participants: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewEvent {
    pub title: String,
    pub description: String,
    pub location: String,
    pub event_date: DateTime<Utc>,
    pub created_by: String,
    pub max_participants: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventWithCreator {
    #[serde(flatten)]
    pub event: Event,
    #[serde(default)]
    pub creator: Option<AuthorSummary>,
}

/// Event columns embedded through `event_participants` on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: String,
    pub title: String,
    pub event_date: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventParticipant {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_tolerates_null_text_columns() {
        let json = r#"{
            "id": "u1",
            "email": "a@b.c",
            "username": "ada",
            "full_name": null,
            "bio": null,
            "profile_photo": null,
            "points": 30,
            "created_at": "2025-07-28T10:00:00+00:00",
            "updated_at": null
        }"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.full_name, "");
        assert_eq!(profile.photo_url(), None);
        assert_eq!(profile.display_name(), "ada");
    }

    #[test]
    fn feed_row_deserializes_embedded_relations() {
        let json = r#"{
            "id": "p1",
            "user_id": "u1",
            "caption": "Planted an oak",
            "media_url": "",
            "media_type": "image",
            "category": "Tree Planting",
            "points_awarded": 10,
            "created_at": "2025-07-28T10:00:00.123456+00:00",
            "author": {"username": "ada", "full_name": "Ada L", "profile_photo": null},
            "post_likes": [{"id": "l1", "user_id": "u2"}],
            "post_comments": [{
                "id": "c1",
                "content": "nice",
                "created_at": "2025-07-28T11:00:00+00:00",
                "author": {"username": "bob", "full_name": "Bob"}
            }]
        }"#;
        let row: PostWithRelations = serde_json::from_str(json).unwrap();
        assert_eq!(row.post.category, "Tree Planting");
        assert_eq!(row.post.media(), None);
        assert_eq!(row.post_likes.len(), 1);
        assert_eq!(
            row.post_comments[0].author.as_ref().unwrap().display_name(),
            "Bob"
        );
    }

    #[test]
    fn profile_update_skips_unset_fields() {
        let update = ProfileUpdate {
            bio: Some("hi".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "bio": "hi" }));
        assert!(!update.is_empty());
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn media_type_follows_mime_prefix() {
        assert_eq!(MediaType::from_mime("video/mp4"), MediaType::Video);
        assert_eq!(MediaType::from_mime("image/png"), MediaType::Image);
    }

    #[test]
    fn initial_handles_empty_names() {
        assert_eq!(initial_of("ada"), "A");
        assert_eq!(initial_of("  "), "?");
    }
}
