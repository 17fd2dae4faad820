//! Media validation and upload to the public buckets.

use bytes::Bytes;
use thiserror::Error;

use crate::backend::{BackendError, Bucket, Credential, ObjectStore};

/// Bucket configuration the app depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPolicy {
    pub name: &'static str,
    pub public: bool,
    pub max_bytes: u64,
    pub allowed_mime: &'static [&'static str],
}

pub const POSTS: BucketPolicy = BucketPolicy {
    name: "posts",
    public: true,
    max_bytes: 10 * 1024 * 1024,
    allowed_mime: &[
        "image/jpeg",
        "image/jpg",
        "image/png",
        "image/gif",
        "image/webp",
        "video/mp4",
        "video/webm",
    ],
};

pub const PROFILES: BucketPolicy = BucketPolicy {
    name: "profiles",
    public: true,
    max_bytes: 5 * 1024 * 1024,
    allowed_mime: &[
        "image/jpeg",
        "image/jpg",
        "image/png",
        "image/gif",
        "image/webp",
    ],
};

pub const BUCKETS: [BucketPolicy; 2] = [POSTS, PROFILES];

impl BucketPolicy {
    pub fn allows(&self, mime: &str) -> bool {
        self.allowed_mime.contains(&mime)
    }

    pub fn to_bucket(&self) -> Bucket {
        Bucket {
            id: self.name.to_string(),
            name: self.name.to_string(),
            public: self.public,
            file_size_limit: Some(self.max_bytes),
            allowed_mime_types: Some(self.allowed_mime.iter().map(|m| m.to_string()).collect()),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file is empty")]
    Empty,

    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("file type {0} is not allowed")]
    UnsupportedType(String),

    #[error("upload rejected: {0}")]
    Rejected(#[from] BackendError),
}

impl UploadError {
    /// Text shown on the page.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::Empty => "Please choose a non-empty file.".to_string(),
            UploadError::TooLarge { limit, .. } => {
                format!("File is too large. The limit is {} MB.", limit / (1024 * 1024))
            }
            UploadError::UnsupportedType(mime) => {
                format!("File type {mime} is not allowed.")
            }
            UploadError::Rejected(BackendError::Api { message, .. }) => {
                friendly_message(message).to_string()
            }
            UploadError::Rejected(BackendError::NotConfigured) => {
                "Storage is not configured.".to_string()
            }
            UploadError::Rejected(_) => friendly_message("").to_string(),
        }
    }
}

/// Map platform error text to what the user should do about it.
pub fn friendly_message(platform_text: &str) -> &'static str {
    let text = platform_text.to_lowercase();
    if text.contains("row-level security") {
        "Upload blocked by storage access policy. Run `greenpoint storage setup`."
    } else if text.contains("bucket not found") {
        "Storage bucket is missing. Run `greenpoint storage setup`."
    } else if text.contains("payload too large") || text.contains("exceeded the maximum allowed size")
    {
        "File is too large."
    } else if text.contains("mime type") {
        "File type is not allowed."
    } else {
        "Upload failed. Please try again."
    }
}

/// A file taken from a multipart form.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Lowercased `type/subtype` with any parameters dropped.
fn essence(raw: &str) -> Option<String> {
    let mime: mime_guess::Mime = raw.trim().parse().ok()?;
    Some(mime.essence_str().to_ascii_lowercase())
}

impl MediaFile {
    /// Browsers send `application/octet-stream` for some files; fall back
    /// to guessing from the name.
    pub fn new(file_name: String, content_type: Option<String>, bytes: Bytes) -> Self {
        let content_type = content_type
            .as_deref()
            .and_then(essence)
            .filter(|c| c != "application/octet-stream")
            .unwrap_or_else(|| {
                mime_guess::from_path(&file_name)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn extension(&self) -> String {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase)
            .or_else(|| {
                mime_guess::get_mime_extensions_str(&self.content_type)
                    .and_then(|exts| exts.first())
                    .map(|e| e.to_string())
            })
            .unwrap_or_else(|| "bin".to_string())
    }
}

pub fn validate(policy: &BucketPolicy, file: &MediaFile) -> Result<(), UploadError> {
    if file.bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    if !policy.allows(&file.content_type) {
        return Err(UploadError::UnsupportedType(file.content_type.clone()));
    }
    if file.size() > policy.max_bytes {
        return Err(UploadError::TooLarge {
            size: file.size(),
            limit: policy.max_bytes,
        });
    }
    Ok(())
}

pub fn post_media_path(user_id: &str, millis: i64, extension: &str) -> String {
    format!("{user_id}/post_{millis}.{extension}")
}

pub fn avatar_path(user_id: &str, extension: &str) -> String {
    format!("{user_id}/avatar.{extension}")
}

/// Validate, upload and return the public URL.
pub async fn upload(
    objects: &dyn ObjectStore,
    cred: &Credential,
    policy: &BucketPolicy,
    path: &str,
    file: &MediaFile,
    upsert: bool,
) -> Result<String, UploadError> {
    validate(policy, file)?;

    tracing::info!(
        "Uploading {} ({} bytes, {}) to {}/{}",
        file.file_name,
        file.size(),
        file.content_type,
        policy.name,
        path
    );
    if let Err(e) = objects
        .upload(
            cred,
            policy.name,
            path,
            file.bytes.clone(),
            &file.content_type,
            upsert,
        )
        .await
    {
        tracing::error!("Upload to {}/{} failed: {}", policy.name, path, e);
        return Err(UploadError::Rejected(e));
    }

    let url = objects.public_url(policy.name, path);
    probe(objects, &url).await;
    Ok(url)
}

/// HEAD the public URL for the logs. Never fails the upload.
async fn probe(objects: &dyn ObjectStore, url: &str) {
    for attempt in 1..=2 {
        match objects.probe(url).await {
            Ok(status) if (200..300).contains(&status) => {
                tracing::debug!("Public URL {} is reachable", url);
                return;
            }
            Ok(status) => {
                tracing::warn!("Public URL {} answered {} (attempt {})", url, status, attempt)
            }
            Err(e) => tracing::warn!("Probe of {} failed (attempt {}): {}", url, attempt, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, mime: &str, size: usize) -> MediaFile {
        MediaFile::new(name.into(), Some(mime.into()), Bytes::from(vec![0u8; size]))
    }

    #[test]
    fn accepts_every_allowed_type_at_the_limit() {
        for policy in BUCKETS {
            for mime in policy.allowed_mime {
                let f = file("x", mime, policy.max_bytes as usize);
                assert!(validate(&policy, &f).is_ok(), "{} {}", policy.name, mime);
            }
        }
    }

    #[test]
    fn content_type_is_reduced_to_lowercase_essence() {
        for raw in ["IMAGE/PNG", "image/png; charset=binary", " Image/Png "] {
            let f = file("upload", raw, 10);
            assert_eq!(f.content_type, "image/png", "{raw}");
            assert!(validate(&PROFILES, &f).is_ok(), "{raw}");
        }
        assert_eq!(file("photo.jpg", "not a mime", 10).content_type, "image/jpeg");
        assert_eq!(file("clip.mp4", "", 10).content_type, "video/mp4");
    }

    #[test]
    fn rejects_oversize_and_unlisted_types() {
        let big = file("a.png", "image/png", PROFILES.max_bytes as usize + 1);
        assert!(matches!(
            validate(&PROFILES, &big),
            Err(UploadError::TooLarge { .. })
        ));

        let video = file("a.mp4", "video/mp4", 10);
        assert!(validate(&POSTS, &video).is_ok());
        assert!(matches!(
            validate(&PROFILES, &video),
            Err(UploadError::UnsupportedType(_))
        ));

        let empty = file("a.png", "image/png", 0);
        assert!(matches!(validate(&POSTS, &empty), Err(UploadError::Empty)));
    }

    #[test]
    fn platform_errors_map_to_user_messages() {
        assert!(friendly_message("new row violates row-level security policy")
            .contains("access policy"));
        assert!(friendly_message("Bucket not found").contains("bucket is missing"));
        assert_eq!(friendly_message("Payload too large"), "File is too large.");
        assert_eq!(
            friendly_message("The object exceeded the maximum allowed size"),
            "File is too large."
        );
        assert_eq!(
            friendly_message("mime type image/bmp is not supported"),
            "File type is not allowed."
        );
        assert_eq!(friendly_message("boom"), "Upload failed. Please try again.");
    }

    #[test]
    fn content_type_falls_back_to_file_name() {
        let f = MediaFile::new(
            "clip.webm".into(),
            Some("application/octet-stream".into()),
            Bytes::from_static(b"1"),
        );
        assert_eq!(f.content_type, "video/webm");
        assert_eq!(f.extension(), "webm");
    }

    #[test]
    fn paths_follow_owner_prefix() {
        assert_eq!(post_media_path("u1", 1700, "jpg"), "u1/post_1700.jpg");
        assert_eq!(avatar_path("u1", "png"), "u1/avatar.png");
    }
}
