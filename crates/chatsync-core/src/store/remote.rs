//! Remote session persistence
//!
//! The remote store is a trusted CRUD service keyed by owner. Authentication
//! happens elsewhere; this module only carries the bearer token it is given.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::RemoteConfig;
use crate::session::{GroupChatSummary, SessionRecord};
use crate::{Error, Result};

/// Authoritative per-owner session storage
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every session owned by `owner_id`. A partial fetch is an error, never
    /// a shorter list.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SessionRecord>>;

    /// Insert a new session. Fails with [`Error::Conflict`] if the id already
    /// exists for the owner.
    async fn create(&self, record: &SessionRecord, owner_id: &str) -> Result<()>;

    /// Insert or overwrite by id
    async fn upsert(&self, record: &SessionRecord, owner_id: &str) -> Result<()>;

    /// Update the name and bump `lastModified`. Fails with
    /// [`Error::NotFound`] if the owner has no session with that id.
    async fn rename(&self, id: &str, new_name: &str, owner_id: &str) -> Result<()>;

    /// Remove one of the owner's sessions; absent ids are not an error
    async fn delete(&self, id: &str, owner_id: &str) -> Result<()>;
}

/// Read-only source of collaborative chats
#[async_trait]
pub trait GroupChatSource: Send + Sync {
    async fn list_group_chats(&self, owner_id: &str) -> Result<Vec<GroupChatSummary>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenameBody<'a> {
    name: &'a str,
    last_modified: chrono::DateTime<chrono::Utc>,
}

/// HTTP client for the remote session service
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpRemoteStore {
    /// Create a new remote store client
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("remote.base_url is not set".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        info!("Remote session store initialized for: {}", base_url);

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn owner_sessions_url(&self, owner_id: &str) -> String {
        format!("{}/users/{}/sessions", self.base_url, owner_id)
    }

    fn session_url(&self, owner_id: &str, id: &str) -> String {
        format!("{}/{}", self.owner_sessions_url(owner_id), id)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        self.authorize(request).send().await.map_err(transport_error)
    }
}

/// Map a transport-level failure. Everything reqwest reports before a status
/// code is available (connect, timeout, truncated body) is transient.
fn transport_error(err: reqwest::Error) -> Error {
    Error::Network(err.to_string())
}

/// Map a non-success status to the error taxonomy
pub(crate) fn status_error(status: StatusCode, body: String) -> Error {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => Error::Network(message),
        s if s.is_server_error() => Error::Network(message),
        s => Error::Remote {
            status: s.as_u16(),
            message,
        },
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!("Remote store request failed: {} - {}", status, body);
    Err(status_error(status, body))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SessionRecord>> {
        let url = self.owner_sessions_url(owner_id);
        debug!("Fetching sessions from: {}", url);

        let response = check(self.send(self.client.get(&url)).await?).await?;
        // A body that fails to decode is treated like a dropped connection
        let sessions: Vec<SessionRecord> = response.json().await.map_err(transport_error)?;

        info!("Fetched {} remote sessions", sessions.len());
        Ok(sessions)
    }

    async fn create(&self, record: &SessionRecord, owner_id: &str) -> Result<()> {
        let url = self.owner_sessions_url(owner_id);
        debug!("Creating remote session: {}", record.id);

        check(self.send(self.client.post(&url).json(record)).await?).await?;
        Ok(())
    }

    async fn upsert(&self, record: &SessionRecord, owner_id: &str) -> Result<()> {
        let url = self.session_url(owner_id, &record.id);
        debug!("Upserting remote session: {}", record.id);

        check(self.send(self.client.put(&url).json(record)).await?).await?;
        Ok(())
    }

    async fn rename(&self, id: &str, new_name: &str, owner_id: &str) -> Result<()> {
        let body = RenameBody {
            name: new_name,
            last_modified: chrono::Utc::now(),
        };
        debug!("Renaming remote session: {}", id);

        check(self.send(self.client.patch(self.session_url(owner_id, id)).json(&body)).await?).await?;
        Ok(())
    }

    async fn delete(&self, id: &str, owner_id: &str) -> Result<()> {
        debug!("Deleting remote session: {}", id);

        match check(self.send(self.client.delete(self.session_url(owner_id, id))).await?).await {
            Ok(_) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GroupChatSource for HttpRemoteStore {
    async fn list_group_chats(&self, owner_id: &str) -> Result<Vec<GroupChatSummary>> {
        let url = format!("{}/users/{}/group-chats", self.base_url, owner_id);
        debug!("Fetching group chats from: {}", url);

        let response = check(self.send(self.client.get(&url)).await?).await?;
        response.json().await.map_err(transport_error)
    }
}
