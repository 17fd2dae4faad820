//! HTTP client for the hosted platform.
//!
//! One [`RemoteClient`] carries the base URL, keys and a pooled
//! [`reqwest::Client`]; the row, auth and storage traits are implemented on it
//! in the submodules.

mod auth;
mod rows;
mod storage;
#[cfg(test)]
mod stub;

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::backend::{BackendError, BackendResult, Credential};
use crate::config::BackendConfig;

/// Rows requested per page. Matches the platform's default `max-rows`, the
/// most a single row response will ever carry.
pub const PAGE_SIZE: usize = 1000;

pub struct RemoteClient {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    service_key: Option<String>,
    configured: bool,
    page_size: usize,
}

impl RemoteClient {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let base = Url::parse(config.url.trim_end_matches('/'))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base,
            anon_key: config.anon_key.clone(),
            service_key: config.service_key.clone(),
            configured: config.is_configured(),
            page_size: PAGE_SIZE,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
    }

    fn bearer<'a>(&'a self, cred: &'a Credential) -> &'a str {
        match cred {
            Credential::Anon => self.anon_key.as_str(),
            Credential::User(token) => token.as_str(),
            Credential::Service => self.service_key.as_deref().unwrap_or_else(|| {
                tracing::warn!("No service key configured, falling back to the anon key");
                self.anon_key.as_str()
            }),
        }
    }

    /// Start a request with the platform's key headers. Fails fast when the
    /// backend is a placeholder so no request leaves the process.
    pub(crate) fn request(
        &self,
        method: Method,
        url: &str,
        cred: &Credential,
    ) -> BackendResult<RequestBuilder> {
        if !self.configured {
            return Err(BackendError::NotConfigured);
        }
        let key = match cred {
            Credential::Service => self.bearer(cred),
            _ => self.anon_key.as_str(),
        };
        Ok(self
            .http
            .request(method, url)
            .header("apikey", key)
            .bearer_auth(self.bearer(cred)))
    }

    /// Return the response unchanged on success, or an
    /// [`BackendError::Api`] with the platform's message.
    pub(crate) async fn ensure_success(response: Response) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(BackendError::Api {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    pub(crate) async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = request.send().await?;
        Self::ensure_success(response).await
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> BackendResult<T> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Pull the human-readable message out of an error body. The row, auth and
/// storage services each name the field differently.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> BackendConfig {
        BackendConfig {
            url: url.to_string(),
            anon_key: "anon".to_string(),
            service_key: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn error_message_prefers_known_fields() {
        assert_eq!(
            error_message(r#"{"code":"42501","message":"new row violates row-level security policy"}"#),
            "new row violates row-level security policy"
        );
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = RemoteClient::new(&config("https://abc.supabase.co/")).unwrap();
        assert_eq!(
            client.endpoint("rest/v1/posts"),
            "https://abc.supabase.co/rest/v1/posts"
        );
        assert!(client.is_configured());
    }

    #[test]
    fn placeholder_client_refuses_requests() {
        let client = RemoteClient::new(&config(crate::config::PLACEHOLDER_URL)).unwrap();
        let url = client.endpoint("rest/v1/posts");
        let result = client.request(Method::GET, &url, &Credential::Anon);
        assert!(matches!(result, Err(BackendError::NotConfigured)));
    }
}
