use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;

use super::RemoteClient;
use crate::backend::{BackendError, BackendResult, Credential, Store, Table};
use crate::models::{
    Action, Event, EventSummary, EventWithCreator, LeaderboardRow, NewAction, NewComment,
    NewEvent, NewPost, NewProfile, Post, PostLike, PostWithRelations, Profile, ProfileUpdate,
};

const FEED_SELECT: &str = "*,author:users(username,full_name,profile_photo),\
post_likes(id,user_id),\
post_comments(id,content,created_at,author:users(username,full_name))";
const EVENT_SELECT: &str = "*,creator:users!events_created_by_fkey(username,full_name)";
const JOINED_EVENTS_SELECT: &str = "events(id,title,event_date,location)";
const LEADERBOARD_SELECT: &str = "id,username,full_name,points,profile_photo";

/// Deletes without a filter are refused by the row API, so a full wipe
/// matches every id except the nil UUID.
const NIL_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Query-string builder for the row API's filter syntax.
#[derive(Debug, Clone)]
pub struct Query {
    table: Table,
    params: Vec<(String, String)>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            params: Vec::new(),
        }
    }

    pub fn select(self, columns: &str) -> Self {
        self.param("select", columns.to_string())
    }

    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.param(column, format!("eq.{value}"))
    }

    pub fn neq(self, column: &str, value: impl Display) -> Self {
        self.param(column, format!("neq.{value}"))
    }

    pub fn gte(self, column: &str, value: DateTime<Utc>) -> Self {
        self.param(column, format!("gte.{}", timestamp(value)))
    }

    pub fn lt(self, column: &str, value: DateTime<Utc>) -> Self {
        self.param(column, format!("lt.{}", timestamp(value)))
    }

    pub fn is_in(self, column: &str, values: &[String]) -> Self {
        let quoted: Vec<String> = values.iter().map(|v| format!("\"{v}\"")).collect();
        self.param(column, format!("in.({})", quoted.join(",")))
    }

    pub fn order(self, column: &str, ascending: bool) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.param("order", format!("{column}.{direction}"))
    }

    pub fn limit(self, n: usize) -> Self {
        self.param("limit", n.to_string())
    }

    pub fn offset(self, n: usize) -> Self {
        self.param("offset", n.to_string())
    }

    pub fn param(mut self, key: &str, value: String) -> Self {
        self.params.push((key.to_string(), value));
        self
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Total from a `Content-Range` header such as `0-24/573` or `*/0`.
fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

#[derive(Deserialize)]
struct IdRow {
    id: String,
}

#[derive(Deserialize)]
struct PointsRow {
    points: i64,
}

#[derive(Deserialize)]
struct ParticipationRow {
    events: Option<EventSummary>,
}

#[derive(Serialize)]
struct LikeInsert<'a> {
    post_id: &'a str,
    user_id: &'a str,
}

#[derive(Serialize)]
struct ParticipantInsert<'a> {
    event_id: &'a str,
    user_id: &'a str,
}

impl RemoteClient {
    fn rows_url(&self, table: Table) -> String {
        self.endpoint(&format!("rest/v1/{}", table.as_str()))
    }

    pub async fn fetch<T: DeserializeOwned>(
        &self,
        cred: &Credential,
        query: &Query,
    ) -> BackendResult<Vec<T>> {
        let request = self
            .request(Method::GET, &self.rows_url(query.table()), cred)?
            .query(query.params());
        self.send_json(request).await
    }

    /// Every matching row, a page at a time. A single response is capped
    /// server-side without any error, so reads that must see the whole set
    /// go through here. The query needs a total order for offsets to hold.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        cred: &Credential,
        query: &Query,
    ) -> BackendResult<Vec<T>> {
        let mut rows = Vec::new();
        loop {
            let page_query = query.clone().limit(self.page_size).offset(rows.len());
            let page: Vec<T> = self.fetch(cred, &page_query).await?;
            let done = page.len() < self.page_size;
            rows.extend(page);
            if done {
                return Ok(rows);
            }
        }
    }

    pub async fn count(&self, cred: &Credential, query: &Query) -> BackendResult<u64> {
        let request = self
            .request(Method::HEAD, &self.rows_url(query.table()), cred)?
            .query(query.params())
            .header("Prefer", "count=exact");
        let response = self.send(request).await?;
        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .unwrap_or(0);
        Ok(total)
    }

    async fn insert_returning<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        cred: &Credential,
        table: Table,
        body: &B,
    ) -> BackendResult<T> {
        let request = self
            .request(Method::POST, &self.rows_url(table), cred)?
            .header("Prefer", "return=representation")
            .json(body);
        let rows: Vec<T> = self.send_json(request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("inserted {} row", table.as_str())))
    }

    async fn insert_minimal<B: Serialize + ?Sized>(
        &self,
        cred: &Credential,
        table: Table,
        body: &B,
    ) -> BackendResult<()> {
        let request = self
            .request(Method::POST, &self.rows_url(table), cred)?
            .header("Prefer", "return=minimal")
            .json(body);
        self.send(request).await?;
        Ok(())
    }

    async fn update_rows<B: Serialize + ?Sized>(
        &self,
        cred: &Credential,
        query: &Query,
        body: &B,
    ) -> BackendResult<()> {
        let request = self
            .request(Method::PATCH, &self.rows_url(query.table()), cred)?
            .query(query.params())
            .header("Prefer", "return=minimal")
            .json(body);
        self.send(request).await?;
        Ok(())
    }

    /// Delete matching rows and report how many went away.
    async fn delete_rows(&self, cred: &Credential, query: Query) -> BackendResult<u64> {
        let query = query.select("id");
        let request = self
            .request(Method::DELETE, &self.rows_url(query.table()), cred)?
            .query(query.params())
            .header("Prefer", "return=representation");
        let deleted: Vec<IdRow> = self.send_json(request).await?;
        Ok(deleted.len() as u64)
    }
}

#[async_trait]
impl Store for RemoteClient {
    async fn get_profile(
        &self,
        cred: &Credential,
        user_id: &str,
    ) -> BackendResult<Option<Profile>> {
        let query = Query::from(Table::Users).select("*").eq("id", user_id);
        let rows: Vec<Profile> = self.fetch(cred, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_profile(&self, cred: &Credential, row: &NewProfile) -> BackendResult<Profile> {
        self.insert_returning(cred, Table::Users, row).await
    }

    async fn update_profile(
        &self,
        cred: &Credential,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> BackendResult<()> {
        let query = Query::from(Table::Users).eq("id", user_id);
        self.update_rows(cred, &query, update).await
    }

    async fn delete_profile(&self, cred: &Credential, user_id: &str) -> BackendResult<()> {
        self.delete_rows(cred, Query::from(Table::Users).eq("id", user_id))
            .await?;
        Ok(())
    }

    async fn top_profiles(
        &self,
        cred: &Credential,
        limit: usize,
    ) -> BackendResult<Vec<LeaderboardRow>> {
        let query = Query::from(Table::Users)
            .select(LEADERBOARD_SELECT)
            .order("points", false)
            .limit(limit);
        self.fetch(cred, &query).await
    }

    async fn profiles_by_ids(
        &self,
        cred: &Credential,
        ids: &[String],
    ) -> BackendResult<Vec<LeaderboardRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::from(Table::Users)
            .select(LEADERBOARD_SELECT)
            .is_in("id", ids);
        self.fetch(cred, &query).await
    }

    async fn list_feed(
        &self,
        cred: &Credential,
        category: Option<&str>,
    ) -> BackendResult<Vec<PostWithRelations>> {
        let mut query = Query::from(Table::Posts)
            .select(FEED_SELECT)
            .order("created_at", false)
            .param("post_comments.order", "created_at.asc".to_string());
        if let Some(category) = category {
            query = query.eq("category", category);
        }
        self.fetch(cred, &query).await
    }

    async fn list_user_posts(&self, cred: &Credential, user_id: &str) -> BackendResult<Vec<Post>> {
        let query = Query::from(Table::Posts)
            .select("*")
            .eq("user_id", user_id)
            .order("created_at", false);
        self.fetch(cred, &query).await
    }

    async fn count_user_posts(&self, cred: &Credential, user_id: &str) -> BackendResult<u64> {
        let query = Query::from(Table::Posts).select("id").eq("user_id", user_id);
        self.count(cred, &query).await
    }

    async fn insert_post(&self, cred: &Credential, row: &NewPost) -> BackendResult<Post> {
        self.insert_returning(cred, Table::Posts, row).await
    }

    async fn delete_post(
        &self,
        cred: &Credential,
        post_id: &str,
        owner_id: &str,
    ) -> BackendResult<u64> {
        let query = Query::from(Table::Posts)
            .eq("id", post_id)
            .eq("user_id", owner_id);
        self.delete_rows(cred, query).await
    }

    async fn list_likes(&self, cred: &Credential, post_id: &str) -> BackendResult<Vec<PostLike>> {
        let query = Query::from(Table::PostLikes)
            .select("*")
            .eq("post_id", post_id);
        self.fetch(cred, &query).await
    }

    async fn insert_like(
        &self,
        cred: &Credential,
        post_id: &str,
        user_id: &str,
    ) -> BackendResult<()> {
        self.insert_minimal(cred, Table::PostLikes, &LikeInsert { post_id, user_id })
            .await
    }

    async fn delete_like(&self, cred: &Credential, like_id: &str) -> BackendResult<()> {
        self.delete_rows(cred, Query::from(Table::PostLikes).eq("id", like_id))
            .await?;
        Ok(())
    }

    async fn insert_comment(&self, cred: &Credential, row: &NewComment) -> BackendResult<()> {
        self.insert_minimal(cred, Table::PostComments, row).await
    }

    async fn insert_action(&self, cred: &Credential, row: &NewAction) -> BackendResult<Action> {
        self.insert_returning(cred, Table::Actions, row).await
    }

    async fn list_actions(
        &self,
        cred: &Credential,
        user_id: &str,
        limit: Option<usize>,
    ) -> BackendResult<Vec<Action>> {
        let mut query = Query::from(Table::Actions)
            .select("*")
            .eq("user_id", user_id)
            .order("created_at", false);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        self.fetch(cred, &query).await
    }

    async fn count_actions_since(
        &self,
        cred: &Credential,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> BackendResult<u64> {
        let query = Query::from(Table::Actions)
            .select("id")
            .eq("user_id", user_id)
            .gte("created_at", since);
        self.count(cred, &query).await
    }

    async fn ledger_total(&self, cred: &Credential, user_id: &str) -> BackendResult<i64> {
        let query = Query::from(Table::Actions)
            .select("points")
            .eq("user_id", user_id)
            .order("id", true);
        let rows: Vec<PointsRow> = self.fetch_all(cred, &query).await?;
        Ok(rows.iter().map(|r| r.points).sum())
    }

    async fn actions_since(
        &self,
        cred: &Credential,
        since: DateTime<Utc>,
    ) -> BackendResult<Vec<Action>> {
        let query = Query::from(Table::Actions)
            .select("*")
            .gte("created_at", since)
            .order("id", true);
        self.fetch_all(cred, &query).await
    }

    async fn list_events_from(
        &self,
        cred: &Credential,
        from: DateTime<Utc>,
    ) -> BackendResult<Vec<EventWithCreator>> {
        let query = Query::from(Table::Events)
            .select(EVENT_SELECT)
            .gte("event_date", from)
            .order("event_date", true);
        self.fetch(cred, &query).await
    }

    async fn get_event(&self, cred: &Credential, event_id: &str) -> BackendResult<Option<Event>> {
        let query = Query::from(Table::Events).select("*").eq("id", event_id);
        let rows: Vec<Event> = self.fetch(cred, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_event(&self, cred: &Credential, row: &NewEvent) -> BackendResult<Event> {
        self.insert_returning(cred, Table::Events, row).await
    }

    async fn event_ids_before(
        &self,
        cred: &Credential,
        cutoff: DateTime<Utc>,
    ) -> BackendResult<Vec<String>> {
        let query = Query::from(Table::Events)
            .select("id")
            .lt("event_date", cutoff)
            .order("id", true);
        let rows: Vec<IdRow> = self.fetch_all(cred, &query).await?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    async fn delete_participants_of(
        &self,
        cred: &Credential,
        event_ids: &[String],
    ) -> BackendResult<u64> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let query = Query::from(Table::EventParticipants).is_in("event_id", event_ids);
        self.delete_rows(cred, query).await
    }

    async fn delete_events(&self, cred: &Credential, event_ids: &[String]) -> BackendResult<u64> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let query = Query::from(Table::Events).is_in("id", event_ids);
        self.delete_rows(cred, query).await
    }

    async fn count_participants(&self, cred: &Credential, event_id: &str) -> BackendResult<u64> {
        let query = Query::from(Table::EventParticipants)
            .select("id")
            .eq("event_id", event_id);
        self.count(cred, &query).await
    }

    async fn is_participant(
        &self,
        cred: &Credential,
        event_id: &str,
        user_id: &str,
    ) -> BackendResult<bool> {
        let query = Query::from(Table::EventParticipants)
            .select("id")
            .eq("event_id", event_id)
            .eq("user_id", user_id);
        let rows: Vec<IdRow> = self.fetch(cred, &query).await?;
        Ok(!rows.is_empty())
    }

    async fn insert_participant(
        &self,
        cred: &Credential,
        event_id: &str,
        user_id: &str,
    ) -> BackendResult<()> {
        self.insert_minimal(
            cred,
            Table::EventParticipants,
            &ParticipantInsert { event_id, user_id },
        )
        .await
    }

    async fn delete_participant(
        &self,
        cred: &Credential,
        event_id: &str,
        user_id: &str,
    ) -> BackendResult<()> {
        let query = Query::from(Table::EventParticipants)
            .eq("event_id", event_id)
            .eq("user_id", user_id);
        self.delete_rows(cred, query).await?;
        Ok(())
    }

    async fn joined_events(
        &self,
        cred: &Credential,
        user_id: &str,
    ) -> BackendResult<Vec<EventSummary>> {
        let query = Query::from(Table::EventParticipants)
            .select(JOINED_EVENTS_SELECT)
            .eq("user_id", user_id);
        let rows: Vec<ParticipationRow> = self.fetch(cred, &query).await?;
        Ok(rows.into_iter().filter_map(|r| r.events).collect())
    }

    async fn clear_table(&self, cred: &Credential, table: Table) -> BackendResult<()> {
        let deleted = self
            .delete_rows(cred, Query::from(table).neq("id", NIL_ID))
            .await?;
        tracing::info!("Cleared {} rows from {}", deleted, table.as_str());
        Ok(())
    }

    async fn exec_sql(&self, cred: &Credential, sql: &str) -> BackendResult<()> {
        let mut body = HashMap::new();
        body.insert("sql", sql);
        let request = self
            .request(Method::POST, &self.endpoint("rest/v1/rpc/exec_sql"), cred)?
            .json(&body);
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::remote::stub::{self, Stub, ANON_KEY, SERVICE_KEY};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn query_builds_filter_syntax() {
        let at = Utc.with_ymd_and_hms(2025, 7, 28, 10, 0, 0).unwrap();
        let query = Query::from(Table::Events)
            .select("id")
            .lt("event_date", at)
            .order("event_date", true)
            .limit(5);
        assert_eq!(query.table(), Table::Events);
        assert_eq!(
            query.params(),
            &[
                ("select".to_string(), "id".to_string()),
                (
                    "event_date".to_string(),
                    "lt.2025-07-28T10:00:00.000Z".to_string()
                ),
                ("order".to_string(), "event_date.asc".to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn in_filter_quotes_values() {
        let query = Query::from(Table::Events).is_in("id", &["a".into(), "b".into()]);
        assert_eq!(query.params()[0].1, r#"in.("a","b")"#);
    }

    #[test]
    fn content_range_total() {
        assert_eq!(parse_content_range("0-24/573"), Some(573));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-24/*"), None);
    }

    fn action_json(id: usize, points: i64) -> serde_json::Value {
        json!({
            "id": format!("a{id}"),
            "user_id": "u1",
            "action_type": "post_created",
            "description": null,
            "points": points,
            "post_id": null,
            "created_at": "2025-07-28T10:00:00Z"
        })
    }

    /// Serves `total` ledger rows worth one point each, honouring limit/offset.
    async fn ledger_stub(total: usize, page_size: usize) -> Stub {
        let mut stub = Stub::start(move |r| {
            let limit: usize = r.param("limit").unwrap().parse().unwrap();
            let offset: usize = r.param("offset").unwrap().parse().unwrap();
            let rows: Vec<_> = (offset..total.min(offset + limit))
                .map(|_| json!({"points": 1}))
                .collect();
            stub::json(StatusCode::OK, json!(rows))
        })
        .await;
        stub.client.page_size = page_size;
        stub
    }

    #[tokio::test]
    async fn ledger_total_reads_every_page() {
        let stub = ledger_stub(5, 2).await;
        let total = stub
            .client
            .ledger_total(&Credential::User("tok".into()), "u1")
            .await
            .unwrap();
        assert_eq!(total, 5);

        let requests = stub.requests();
        let offsets: Vec<_> = requests.iter().map(|r| r.param("offset").unwrap()).collect();
        assert_eq!(offsets, ["0", "2", "4"]);
        for r in &requests {
            assert_eq!(r.path, "/rest/v1/actions");
            assert_eq!(r.param("user_id"), Some("eq.u1"));
            assert_eq!(r.param("order"), Some("id.asc"));
            assert_eq!(r.param("limit"), Some("2"));
        }
    }

    #[tokio::test]
    async fn full_last_page_needs_one_more_request() {
        let stub = ledger_stub(4, 2).await;
        let total = stub
            .client
            .ledger_total(&Credential::Anon, "u1")
            .await
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(stub.requests().len(), 3);
    }

    #[tokio::test]
    async fn windowed_actions_are_paged_past_the_row_cap() {
        let mut stub = Stub::start(|r| {
            let offset: usize = r.param("offset").unwrap().parse().unwrap();
            let rows: Vec<_> = (offset..3.min(offset + 2))
                .map(|i| action_json(i, 10))
                .collect();
            stub::json(StatusCode::OK, json!(rows))
        })
        .await;
        stub.client.page_size = 2;

        let since = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let actions = stub
            .client
            .actions_since(&Credential::Anon, since)
            .await
            .unwrap();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[2].id, "a2");
        assert_eq!(
            stub.last().param("created_at"),
            Some("gte.2025-07-01T00:00:00.000Z")
        );
    }

    #[tokio::test]
    async fn insert_returns_the_stored_row() {
        let stub = Stub::start(|_| stub::json(StatusCode::CREATED, json!([action_json(7, 10)]))).await;
        let row = NewAction {
            user_id: "u1".into(),
            action_type: "post_created".into(),
            description: "Posted".into(),
            points: 10,
            post_id: None,
        };
        let action = stub
            .client
            .insert_action(&Credential::User("user-token".into()), &row)
            .await
            .unwrap();
        assert_eq!(action.id, "a7");
        assert_eq!(action.description, "");

        let r = stub.last();
        assert_eq!(r.method, axum::http::Method::POST);
        assert_eq!(r.path, "/rest/v1/actions");
        assert_eq!(r.header("prefer"), Some("return=representation"));
        assert_eq!(r.header("apikey"), Some(ANON_KEY));
        assert_eq!(r.header("authorization"), Some("Bearer user-token"));
        assert_eq!(r.json()["points"], 10);
    }

    #[tokio::test]
    async fn count_reads_total_from_content_range() {
        let stub = Stub::start(|_| {
            (StatusCode::PARTIAL_CONTENT, [("content-range", "0-0/7")]).into_response()
        })
        .await;
        let count = stub
            .client
            .count_user_posts(&Credential::Anon, "u1")
            .await
            .unwrap();
        assert_eq!(count, 7);

        let r = stub.last();
        assert_eq!(r.method, axum::http::Method::HEAD);
        assert_eq!(r.path, "/rest/v1/posts");
        assert_eq!(r.header("prefer"), Some("count=exact"));
        assert_eq!(r.param("user_id"), Some("eq.u1"));
        assert_eq!(r.header("authorization"), Some(&*format!("Bearer {ANON_KEY}")));
    }

    #[tokio::test]
    async fn delete_counts_returned_ids() {
        let stub = Stub::start(|_| stub::json(StatusCode::OK, json!([{"id": "e1"}, {"id": "e2"}]))).await;
        let deleted = stub
            .client
            .delete_events(&Credential::Service, &["e1".into(), "e2".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let r = stub.last();
        assert_eq!(r.method, axum::http::Method::DELETE);
        assert_eq!(r.param("id"), Some(r#"in.("e1","e2")"#));
        assert_eq!(r.param("select"), Some("id"));
        assert_eq!(r.header("prefer"), Some("return=representation"));
    }

    #[tokio::test]
    async fn service_credential_sends_service_key_twice() {
        let stub = Stub::start(|_| StatusCode::NO_CONTENT.into_response()).await;
        stub.client
            .exec_sql(&Credential::Service, "select 1;")
            .await
            .unwrap();

        let r = stub.last();
        assert_eq!(r.path, "/rest/v1/rpc/exec_sql");
        assert_eq!(r.header("apikey"), Some(SERVICE_KEY));
        assert_eq!(r.header("authorization"), Some(&*format!("Bearer {SERVICE_KEY}")));
        assert_eq!(r.json(), json!({"sql": "select 1;"}));
    }

    #[tokio::test]
    async fn error_body_becomes_api_error() {
        let stub = Stub::start(|_| {
            stub::json(
                StatusCode::FORBIDDEN,
                json!({"code": "42501", "message": "new row violates row-level security policy"}),
            )
        })
        .await;
        let err = stub
            .client
            .insert_like(&Credential::User("tok".into()), "p1", "u1")
            .await
            .unwrap_err();
        match &err {
            BackendError::Api { status, message } => {
                assert_eq!(*status, 403);
                assert_eq!(message, "new row violates row-level security policy");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_access_denied());
        assert_eq!(stub.last().header("prefer"), Some("return=minimal"));
    }
}
