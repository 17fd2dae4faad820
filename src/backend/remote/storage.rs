use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Serialize;

use super::RemoteClient;
use crate::backend::{BackendResult, Bucket, Credential, ObjectInfo, ObjectStore};

#[derive(Serialize)]
struct ListBody<'a> {
    prefix: &'a str,
    limit: u32,
    offset: u32,
}

#[async_trait]
impl ObjectStore for RemoteClient {
    async fn list_buckets(&self) -> BackendResult<Vec<Bucket>> {
        let request = self.request(
            Method::GET,
            &self.endpoint("storage/v1/bucket"),
            &Credential::Service,
        )?;
        self.send_json(request).await
    }

    async fn create_bucket(&self, bucket: &Bucket) -> BackendResult<()> {
        let request = self
            .request(
                Method::POST,
                &self.endpoint("storage/v1/bucket"),
                &Credential::Service,
            )?
            .json(bucket);
        self.send(request).await?;
        Ok(())
    }

    async fn upload(
        &self,
        cred: &Credential,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        upsert: bool,
    ) -> BackendResult<()> {
        let url = self.endpoint(&format!("storage/v1/object/{bucket}/{path}"));
        let request = self
            .request(Method::POST, &url, cred)?
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .header("cache-control", "max-age=3600")
            .body(bytes);
        self.send(request).await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> BackendResult<Vec<ObjectInfo>> {
        let url = self.endpoint(&format!("storage/v1/object/list/{bucket}"));
        let request = self
            .request(Method::POST, &url, &Credential::Service)?
            .json(&ListBody {
                prefix,
                limit: 100,
                offset: 0,
            });
        self.send_json(request).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.endpoint(&format!("storage/v1/object/public/{bucket}/{path}"))
    }

    async fn probe(&self, url: &str) -> BackendResult<u16> {
        let response = self.http.head(url).send().await?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::remote::stub::{self, Stub, ANON_KEY, SERVICE_KEY};
    use crate::config::BackendConfig;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn public_url_points_at_public_object_path() {
        let client = RemoteClient::new(&BackendConfig {
            url: "https://abc.supabase.co".into(),
            anon_key: "anon".into(),
            service_key: None,
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(
            client.public_url("posts", "u1/post_1.jpg"),
            "https://abc.supabase.co/storage/v1/object/public/posts/u1/post_1.jpg"
        );
    }

    #[tokio::test]
    async fn upload_sends_bytes_with_upsert_flag() {
        let stub = Stub::start(|_| stub::json(StatusCode::OK, json!({"Key": "posts/u1/post_1.png"}))).await;
        stub.client
            .upload(
                &Credential::User("user-token".into()),
                "posts",
                "u1/post_1.png",
                Bytes::from_static(b"\x89PNG"),
                "image/png",
                false,
            )
            .await
            .unwrap();

        let r = stub.last();
        assert_eq!(r.path, "/storage/v1/object/posts/u1/post_1.png");
        assert_eq!(r.header("x-upsert"), Some("false"));
        assert_eq!(r.header("content-type"), Some("image/png"));
        assert_eq!(r.header("apikey"), Some(ANON_KEY));
        assert_eq!(r.header("authorization"), Some("Bearer user-token"));
        assert_eq!(&r.body[..], b"\x89PNG");
    }

    #[tokio::test]
    async fn bucket_listing_uses_service_key() {
        let stub = Stub::start(|_| {
            stub::json(
                StatusCode::OK,
                json!([{
                    "id": "posts",
                    "name": "posts",
                    "public": true,
                    "file_size_limit": 10485760,
                    "allowed_mime_types": ["image/png"]
                }]),
            )
        })
        .await;
        let buckets = stub.client.list_buckets().await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].file_size_limit, Some(10_485_760));

        let r = stub.last();
        assert_eq!(r.path, "/storage/v1/bucket");
        assert_eq!(r.header("apikey"), Some(SERVICE_KEY));
    }
}
