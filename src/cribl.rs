//! Cribl.Cloud lookup publication.
//!
//! Publishing a lookup file is a fixed sequence against the Cribl API:
//! authenticate, upload the file to a temporary name, create or update the
//! lookup to point at it, commit, and deploy the commit to the worker group.

use crate::config::CriblConfig;
use crate::error::UploadError;
use crate::sources::psychic::USER_AGENT;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Whether a publication created a new lookup or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupAction {
    Created,
    Updated,
}

/// Outcome of publishing one lookup file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// Lookup id in Cribl (the local file name).
    pub lookup_id: String,
    /// Temporary file name assigned by Cribl on upload.
    pub temp_filename: String,
    pub action: LookupAction,
    /// Commit that was deployed.
    pub commit_id: String,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Items<T> {
    #[serde(default, bound(deserialize = "T: Deserialize<'de>"))]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct LookupItem {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CommitItem {
    #[serde(default)]
    commit: Option<String>,
}

/// Client for the Cribl.Cloud lookup and version APIs.
pub struct CriblClient {
    config: CriblConfig,
    client: Client,
}

impl CriblClient {
    /// Create a new Cribl client.
    pub fn new(config: CriblConfig, timeout: Duration) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(UploadError::Client)?;

        Ok(Self { config, client })
    }

    /// Worker group this client publishes to.
    pub fn worker_group(&self) -> &str {
        &self.config.worker_group
    }

    fn workspace_url(&self) -> String {
        format!(
            "{}/organizations/{}/workspaces/{}/app/api/v1",
            self.config.api_url, self.config.organization_id, self.config.workspace
        )
    }

    fn group_url(&self, suffix: &str) -> String {
        format!(
            "{}/m/{}/{}",
            self.workspace_url(),
            self.config.worker_group,
            suffix
        )
    }

    fn deploy_url(&self) -> String {
        format!(
            "{}/master/groups/{}/deploy",
            self.workspace_url(),
            self.config.worker_group
        )
    }

    /// Obtain a bearer token with the client-credentials grant.
    pub async fn authenticate(&self) -> Result<String, UploadError> {
        const STEP: &str = "authenticate";
        let url = format!("{}/oauth/token", self.config.login_url);
        let payload = TokenRequest {
            grant_type: "client_credentials",
            client_id: &self.config.client_id,
            client_secret: self.config.client_secret.expose(),
            audience: &self.config.audience,
        };

        let response = send(STEP, self.client.post(&url).json(&payload)).await?;
        let token: TokenResponse = parse(STEP, response).await?;
        if token.access_token.is_empty() {
            return Err(invalid(STEP, "empty access_token"));
        }
        Ok(token.access_token)
    }

    /// Upload a file, returning the temporary file name Cribl assigned.
    pub async fn upload_file(&self, token: &str, path: &Path) -> Result<String, UploadError> {
        const STEP: &str = "upload";
        let lookup_id = crate::config::lookup_id(path);
        let io_err = |source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();

        debug!(lookup = %lookup_id, bytes = size, "Uploading lookup file");

        let request = self
            .client
            .put(self.group_url("system/lookups"))
            .query(&[("filename", lookup_id.as_str())])
            .bearer_auth(token)
            .header(CONTENT_TYPE, content_type_for(&lookup_id))
            .header(ACCEPT, "application/json")
            .header(CONTENT_LENGTH, size)
            .body(Body::from(file));

        let response = send(STEP, request).await?;
        let upload: UploadResponse = parse(STEP, response).await?;

        let temp_filename = upload
            .filename
            .filter(|f| !f.is_empty())
            .ok_or_else(|| invalid(STEP, "response is missing `filename`"))?;

        if !temp_filename.starts_with(base_name(&lookup_id)) {
            return Err(invalid(
                STEP,
                format!("unexpected temporary filename `{}`", temp_filename),
            ));
        }

        Ok(temp_filename)
    }

    /// Check whether a lookup is already registered in the worker group.
    pub async fn lookup_exists(&self, token: &str, lookup_id: &str) -> Result<bool, UploadError> {
        const STEP: &str = "check lookup";
        let request = self
            .client
            .get(self.group_url(&format!("system/lookups/{}", lookup_id)))
            .bearer_auth(token)
            .header(ACCEPT, "application/json");

        let response = request
            .send()
            .await
            .map_err(|source| UploadError::Http { step: STEP, source })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let response = ensure_success(STEP, response).await?;
        let items: Items<LookupItem> = parse(STEP, response).await?;
        Ok(items
            .items
            .iter()
            .any(|item| item.id.as_deref() == Some(lookup_id)))
    }

    /// Register a new lookup pointing at an uploaded file.
    pub async fn create_lookup(
        &self,
        token: &str,
        lookup_id: &str,
        temp_filename: &str,
    ) -> Result<(), UploadError> {
        let request = self
            .client
            .post(self.group_url("system/lookups"))
            .bearer_auth(token)
            .json(&lookup_payload(lookup_id, temp_filename));

        send("create lookup", request).await?;
        info!(lookup = %lookup_id, group = %self.config.worker_group, "Created new lookup");
        Ok(())
    }

    /// Point an existing lookup at an uploaded file.
    pub async fn update_lookup(
        &self,
        token: &str,
        lookup_id: &str,
        temp_filename: &str,
    ) -> Result<(), UploadError> {
        let request = self
            .client
            .patch(self.group_url(&format!("system/lookups/{}", lookup_id)))
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .json(&lookup_payload(lookup_id, temp_filename));

        send("update lookup", request).await?;
        info!(lookup = %lookup_id, group = %self.config.worker_group, "Updated existing lookup");
        Ok(())
    }

    /// Commit the lookup and its descriptor, returning the commit id.
    pub async fn commit(&self, token: &str, lookup_id: &str) -> Result<String, UploadError> {
        const STEP: &str = "commit";
        let payload = json!({
            "message": "Automated lookup file update",
            "group": self.config.worker_group,
            "files": commit_files(&self.config.worker_group, lookup_id),
        });

        let request = self
            .client
            .post(self.group_url("version/commit"))
            .bearer_auth(token)
            .json(&payload);

        let response = send(STEP, request).await?;
        let commits: Items<CommitItem> = parse(STEP, response).await?;
        commits
            .items
            .into_iter()
            .next()
            .and_then(|item| item.commit)
            .filter(|commit| !commit.is_empty())
            .ok_or_else(|| invalid(STEP, "response is missing a commit id"))
    }

    /// Deploy a commit to the worker group.
    pub async fn deploy(&self, token: &str, commit_id: &str) -> Result<(), UploadError> {
        let request = self
            .client
            .patch(self.deploy_url())
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .json(&json!({ "version": commit_id }));

        send("deploy", request).await?;
        Ok(())
    }

    /// Upload a file and make it live as a lookup.
    pub async fn publish(&self, token: &str, path: &Path) -> Result<UploadResult, UploadError> {
        let lookup_id = crate::config::lookup_id(path);
        let group = self.config.worker_group.as_str();

        let temp_filename = self.upload_file(token, path).await?;
        info!(
            lookup = %lookup_id,
            group = %group,
            temp_filename = %temp_filename,
            "Uploaded lookup file"
        );

        let action = if self.lookup_exists(token, &lookup_id).await? {
            debug!(lookup = %lookup_id, "Lookup exists on target");
            self.update_lookup(token, &lookup_id, &temp_filename).await?;
            LookupAction::Updated
        } else {
            debug!(lookup = %lookup_id, "Lookup does not exist on target");
            self.create_lookup(token, &lookup_id, &temp_filename).await?;
            LookupAction::Created
        };

        let commit_id = self.commit(token, &lookup_id).await?;
        info!(commit = %commit_id, "Changes committed");

        self.deploy(token, &commit_id).await?;
        info!(lookup = %lookup_id, group = %group, commit = %commit_id, "Lookup deployed");

        Ok(UploadResult {
            lookup_id,
            temp_filename,
            action,
            commit_id,
        })
    }
}

async fn send(step: &'static str, request: RequestBuilder) -> Result<Response, UploadError> {
    let response = request
        .send()
        .await
        .map_err(|source| UploadError::Http { step, source })?;
    ensure_success(step, response).await
}

async fn ensure_success(step: &'static str, response: Response) -> Result<Response, UploadError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(UploadError::Status { step, status, body })
}

async fn parse<T: DeserializeOwned>(step: &'static str, response: Response) -> Result<T, UploadError> {
    response
        .json()
        .await
        .map_err(|e| invalid(step, format!("failed to parse response: {}", e)))
}

fn invalid(step: &'static str, message: impl Into<String>) -> UploadError {
    UploadError::InvalidResponse {
        step,
        message: message.into(),
    }
}

fn lookup_payload(lookup_id: &str, temp_filename: &str) -> serde_json::Value {
    json!({
        "id": lookup_id,
        "fileInfo": { "filename": temp_filename },
    })
}

/// Content type Cribl expects for a lookup upload.
fn content_type_for(lookup_id: &str) -> &'static str {
    if lookup_id.ends_with(".csv") {
        "text/csv"
    } else {
        "application/gzip"
    }
}

/// File name up to the first dot.
fn base_name(lookup_id: &str) -> &str {
    lookup_id.split('.').next().unwrap_or(lookup_id)
}

/// Repository paths touched by a lookup change.
fn commit_files(worker_group: &str, lookup_id: &str) -> Vec<String> {
    let descriptor = Path::new(lookup_id).with_extension("yml");
    vec![
        format!("groups/{}/data/lookups/{}", worker_group, lookup_id),
        format!(
            "groups/{}/data/lookups/{}",
            worker_group,
            descriptor.display()
        ),
    ]
}
