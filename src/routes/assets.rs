use axum::extract::Path;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::Embed;

use crate::error::{AppError, AppResult};

/// Stylesheets and images compiled into the binary.
#[derive(Embed)]
#[folder = "assets/"]
struct StaticAssets;

fn etag(hash: [u8; 32]) -> String {
    let hex: String = hash[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("\"{hex}\"")
}

pub async fn serve(Path(path): Path<String>, headers: HeaderMap) -> AppResult<Response> {
    let Some(file) = StaticAssets::get(&path) else {
        tracing::debug!("No embedded asset at {}", path);
        return Err(AppError::NotFound);
    };

    let tag = etag(file.metadata.sha256_hash());
    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == tag);
    if unchanged {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, tag)]).into_response());
    }

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.essence_str().to_string()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
            (header::ETAG, tag),
        ],
        file.data.into_owned(),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stylesheet_is_embedded() {
        assert!(StaticAssets::get("css/app.css").is_some());
        assert!(StaticAssets::get("css/missing.css").is_none());
    }

    #[test]
    fn etag_is_quoted_hex() {
        let tag = etag([0xab; 32]);
        assert_eq!(tag, "\"abababababababab\"");
    }
}
