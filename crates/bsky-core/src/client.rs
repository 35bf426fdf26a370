//! Minimal XRPC client for one authenticated Bluesky session.
//!
//! Covers exactly what the bot needs: login, expired-token refresh, blob
//! upload, record fetch and create, and listing the bot's own posts. Errors
//! are typed here; the application crate wraps them with context.

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::records::{ListedPost, StrongRef, POSTS_COLLECTION};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// XRPC error string the server returns when an access token has expired.
const EXPIRED_TOKEN: &str = "ExpiredToken";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{nsid} failed with status {status}: {error}: {message}")]
    Xrpc {
        nsid: &'static str,
        status: u16,
        error: String,
        message: String,
    },
    #[error("response was missing {0}")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Deserialize)]
struct Session {
    did: String,
    handle: String,
    #[serde(rename = "accessJwt")]
    access_jwt: String,
    #[serde(rename = "refreshJwt")]
    refresh_jwt: String,
}

/// Authenticated XRPC client bound to one account.
#[derive(Debug)]
pub struct BskyClient {
    http: Client,
    service: String,
    session: RwLock<Session>,
}

impl BskyClient {
    /// Log in with an identifier (handle or DID) and app password.
    pub async fn login(service: &str, identifier: &str, password: &str) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let service = service.trim_end_matches('/').to_string();
        let resp = http
            .post(format!("{service}/xrpc/com.atproto.server.createSession"))
            .json(&json!({ "identifier": identifier, "password": password }))
            .send()
            .await?;
        let session: Session = check(resp, "com.atproto.server.createSession")
            .await?
            .json()
            .await?;
        info!("logged in as {} ({})", session.handle, session.did);
        Ok(Self {
            http,
            service,
            session: RwLock::new(session),
        })
    }

    /// DID of the logged-in account.
    pub fn did(&self) -> String {
        self.session.read().did.clone()
    }

    /// Handle of the logged-in account.
    pub fn handle(&self) -> String {
        self.session.read().handle.clone()
    }

    fn access_token(&self) -> String {
        self.session.read().access_jwt.clone()
    }

    /// Trade the refresh token for a new session.
    async fn refresh_session(&self) -> Result<()> {
        let refresh_token = self.session.read().refresh_jwt.clone();
        let resp = self
            .http
            .post(format!(
                "{}/xrpc/com.atproto.server.refreshSession",
                self.service
            ))
            .bearer_auth(refresh_token)
            .send()
            .await?;
        let refreshed: Session = check(resp, "com.atproto.server.refreshSession")
            .await?
            .json()
            .await?;
        info!("refreshed session for {}", refreshed.handle);
        *self.session.write() = refreshed;
        Ok(())
    }

    /// Send an authenticated request, refreshing the session and retrying
    /// once when the access token has expired.
    async fn send_authed<F>(&self, nsid: &'static str, build: F) -> Result<Response>
    where
        F: Fn(&Client, &str) -> reqwest::RequestBuilder,
    {
        let first = build(&self.http, &self.service)
            .bearer_auth(self.access_token())
            .send()
            .await?;
        match check(first, nsid).await {
            Err(Error::Xrpc { ref error, .. }) if error == EXPIRED_TOKEN => {
                debug!("access token expired, refreshing session");
                self.refresh_session().await?;
                let retried = build(&self.http, &self.service)
                    .bearer_auth(self.access_token())
                    .send()
                    .await?;
                check(retried, nsid).await
            }
            other => other,
        }
    }

    /// Upload raw image bytes as a blob, returning the ref to embed.
    pub async fn upload_blob(&self, bytes: Vec<u8>, content_type: &str) -> Result<Value> {
        let content_type = content_type.to_string();
        let resp = self
            .send_authed("com.atproto.repo.uploadBlob", move |http, service| {
                http.post(format!("{service}/xrpc/com.atproto.repo.uploadBlob"))
                    .header(CONTENT_TYPE, content_type.clone())
                    .body(bytes.clone())
            })
            .await?;
        let mut body: Value = resp.json().await?;
        match body.get_mut("blob") {
            Some(blob) => Ok(blob.take()),
            None => Err(Error::MissingField("blob")),
        }
    }

    /// Resolve a post to its strong (content-addressed) ref.
    pub async fn get_post(&self, did: &str, rkey: &str) -> Result<StrongRef> {
        let did = did.to_string();
        let rkey = rkey.to_string();
        let resp = self
            .send_authed("com.atproto.repo.getRecord", move |http, service| {
                http.get(format!("{service}/xrpc/com.atproto.repo.getRecord"))
                    .query(&[
                        ("repo", did.as_str()),
                        ("collection", POSTS_COLLECTION),
                        ("rkey", rkey.as_str()),
                    ])
            })
            .await?;

        #[derive(Deserialize)]
        struct GetRecordResponse {
            uri: String,
            cid: Option<String>,
        }

        let body: GetRecordResponse = resp.json().await?;
        let cid = body.cid.ok_or(Error::MissingField("cid"))?;
        Ok(StrongRef { uri: body.uri, cid })
    }

    /// Publish a post record in the bot's own repo.
    pub async fn create_post(&self, record: Value) -> Result<StrongRef> {
        let body = json!({
            "repo": self.did(),
            "collection": POSTS_COLLECTION,
            "record": record,
        });
        let resp = self
            .send_authed("com.atproto.repo.createRecord", move |http, service| {
                http.post(format!("{service}/xrpc/com.atproto.repo.createRecord"))
                    .json(&body)
            })
            .await?;
        let created: StrongRef = resp.json().await?;
        Ok(created)
    }

    /// List the bot's own most recent posts, newest first.
    pub async fn list_posts(&self, limit: u32) -> Result<Vec<ListedPost>> {
        let repo = self.did();
        let limit = limit.to_string();
        let resp = self
            .send_authed("com.atproto.repo.listRecords", move |http, service| {
                http.get(format!("{service}/xrpc/com.atproto.repo.listRecords"))
                    .query(&[
                        ("repo", repo.as_str()),
                        ("collection", POSTS_COLLECTION),
                        ("limit", limit.as_str()),
                    ])
            })
            .await?;

        #[derive(Debug, Default, Deserialize)]
        struct ListRecordsResponse {
            #[serde(default)]
            records: Vec<ListedPost>,
        }

        let body: ListRecordsResponse = resp.json().await?;
        Ok(body.records)
    }
}

#[derive(Debug, Default, Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

/// Turn a non-2xx response into a typed error, keeping the server's error
/// name so callers can react to specific failures.
async fn check(resp: Response, nsid: &'static str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: XrpcErrorBody = resp.json().await.unwrap_or_default();
    Err(Error::Xrpc {
        nsid,
        status: status.as_u16(),
        error: body.error,
        message: body.message,
    })
}
