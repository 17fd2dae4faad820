use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;

use super::RemoteClient;
use crate::backend::{
    AuthApi, AuthSession, AuthUser, BackendResult, Credential, SignUpOutcome, UserMetadata,
};

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignUpBody<'a> {
    email: &'a str,
    password: &'a str,
    data: &'a UserMetadata,
}

#[derive(Serialize)]
struct VerifyBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    email: &'a str,
    token: &'a str,
}

/// Sign-up answers with a full session when confirmation is disabled and
/// with the bare user object when it is not.
fn parse_sign_up(value: serde_json::Value) -> BackendResult<SignUpOutcome> {
    if value.get("access_token").is_some() {
        let session: AuthSession = serde_json::from_value(value)?;
        return Ok(SignUpOutcome {
            user: Some(session.user.clone()),
            session: Some(session),
        });
    }
    let user_value = value.get("user").cloned().unwrap_or(value);
    let user: Option<AuthUser> = if user_value.get("id").is_some() {
        Some(serde_json::from_value(user_value)?)
    } else {
        None
    };
    Ok(SignUpOutcome {
        user,
        session: None,
    })
}

#[async_trait]
impl AuthApi for RemoteClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<AuthSession> {
        let request = self
            .request(
                Method::POST,
                &self.endpoint("auth/v1/token"),
                &Credential::Anon,
            )?
            .query(&[("grant_type", "password")])
            .json(&PasswordGrant { email, password });
        self.send_json(request).await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> BackendResult<SignUpOutcome> {
        let request = self
            .request(
                Method::POST,
                &self.endpoint("auth/v1/signup"),
                &Credential::Anon,
            )?
            .json(&SignUpBody {
                email,
                password,
                data: metadata,
            });
        let value: serde_json::Value = self.send_json(request).await?;
        parse_sign_up(value)
    }

    async fn verify_otp(&self, email: &str, token: &str) -> BackendResult<AuthSession> {
        let request = self
            .request(
                Method::POST,
                &self.endpoint("auth/v1/verify"),
                &Credential::Anon,
            )?
            .json(&VerifyBody {
                kind: "signup",
                email,
                token,
            });
        self.send_json(request).await
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let cred = Credential::User(access_token.to_string());
        let request = self.request(Method::POST, &self.endpoint("auth/v1/logout"), &cred)?;
        self.send(request).await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> BackendResult<()> {
        let url = self.endpoint(&format!("auth/v1/admin/users/{user_id}"));
        let request = self.request(Method::DELETE, &url, &Credential::Service)?;
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::remote::stub::{self, Stub, ANON_KEY, SERVICE_KEY};
    use crate::backend::BackendError;
    use axum::http::{Method, StatusCode};
    use axum::response::IntoResponse;
    use serde_json::json;

    #[test]
    fn sign_up_with_confirmation_returns_user_only() {
        let outcome = parse_sign_up(json!({
            "id": "u1",
            "email": "ada@example.com",
            "user_metadata": {"username": "ada", "full_name": "Ada"},
            "email_confirmed_at": null
        }))
        .unwrap();
        assert!(outcome.session.is_none());
        let user = outcome.user.unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.user_metadata.username, "ada");
    }

    #[test]
    fn sign_up_without_confirmation_returns_session() {
        let outcome = parse_sign_up(json!({
            "access_token": "tok",
            "refresh_token": "ref",
            "expires_in": 3600,
            "user": {"id": "u1", "email": "ada@example.com"}
        }))
        .unwrap();
        assert_eq!(outcome.session.unwrap().access_token, "tok");
        assert_eq!(outcome.user.unwrap().id, "u1");
    }

    #[test]
    fn sign_up_with_empty_body_has_no_user() {
        let outcome = parse_sign_up(json!({})).unwrap();
        assert!(outcome.user.is_none());
        assert!(outcome.session.is_none());
    }

    #[tokio::test]
    async fn password_sign_in_uses_grant_type_query() {
        let stub = Stub::start(|_| {
            stub::json(
                StatusCode::OK,
                json!({
                    "access_token": "tok",
                    "refresh_token": "ref",
                    "expires_in": 3600,
                    "user": {"id": "u1", "email": "ada@example.com"}
                }),
            )
        })
        .await;
        let session = stub
            .client
            .sign_in_with_password("ada@example.com", "secret123")
            .await
            .unwrap();
        assert_eq!(session.access_token, "tok");
        assert_eq!(session.user.id, "u1");

        let r = stub.last();
        assert_eq!(r.method, Method::POST);
        assert_eq!(r.path, "/auth/v1/token");
        assert_eq!(r.param("grant_type"), Some("password"));
        assert_eq!(r.header("apikey"), Some(ANON_KEY));
        assert_eq!(
            r.json(),
            json!({"email": "ada@example.com", "password": "secret123"})
        );
    }

    #[tokio::test]
    async fn rejected_sign_in_carries_platform_message() {
        let stub = Stub::start(|_| {
            stub::json(
                StatusCode::BAD_REQUEST,
                json!({"error": "invalid_grant", "error_description": "Invalid login credentials"}),
            )
        })
        .await;
        let err = stub
            .client
            .sign_in_with_password("ada@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Api { status: 400, ref message } if message == "Invalid login credentials"
        ));
    }

    #[tokio::test]
    async fn verify_sends_signup_otp() {
        let stub = Stub::start(|_| {
            stub::json(
                StatusCode::OK,
                json!({"access_token": "tok", "user": {"id": "u1"}}),
            )
        })
        .await;
        stub.client
            .verify_otp("ada@example.com", "123456")
            .await
            .unwrap();

        let r = stub.last();
        assert_eq!(r.path, "/auth/v1/verify");
        assert_eq!(
            r.json(),
            json!({"type": "signup", "email": "ada@example.com", "token": "123456"})
        );
    }

    #[tokio::test]
    async fn sign_out_and_admin_delete_pick_their_keys() {
        let stub = Stub::start(|_| StatusCode::NO_CONTENT.into_response()).await;

        stub.client.sign_out("user-token").await.unwrap();
        let r = stub.last();
        assert_eq!(r.path, "/auth/v1/logout");
        assert_eq!(r.header("apikey"), Some(ANON_KEY));
        assert_eq!(r.header("authorization"), Some("Bearer user-token"));

        stub.client.delete_user("u1").await.unwrap();
        let r = stub.last();
        assert_eq!(r.method, Method::DELETE);
        assert_eq!(r.path, "/auth/v1/admin/users/u1");
        assert_eq!(r.header("apikey"), Some(SERVICE_KEY));
        assert_eq!(r.header("authorization"), Some("Bearer service-key"));
    }
}
