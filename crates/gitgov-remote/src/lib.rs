// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-remote
//!
//! A [`RecordStore`] over a hosted git repository's content API, for peers
//! that participate without a local clone. Reads decode base64 file
//! content; writes are create-or-update calls that commit directly to the
//! state branch and return the resulting commit SHA. A losing concurrent
//! write surfaces as [`StoreError::ConcurrentUpdate`] so the caller can
//! re-read and retry.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use gitgov_record::RecordWrapper;
use gitgov_store::{ColonCodec, IdCodec, RecordStore, StoreError, WriteReceipt};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Directory-listing page size the API serves.
const PER_PAGE: usize = 100;

/// Connection settings for a hosted content API.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the repository's content endpoint, without a trailing
    /// slash (e.g. `https://api.example.com/repos/org/project`).
    pub base_url: String,
    /// Branch the records live on (normally the state branch).
    pub branch: String,
    /// Path prefix inside the repository (e.g. `.gitgov/tasks`).
    pub prefix: String,
    /// Bearer token, when the API requires one.
    pub token: Option<String>,
}

/// A record store backed by a hosted git content API.
pub struct RemoteRecordStore {
    client: reqwest::Client,
    config: RemoteConfig,
    codec: Arc<dyn IdCodec>,
}

#[derive(Debug, Deserialize)]
struct ContentFile {
    content: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct DirEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CommitInfo {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    commit: CommitInfo,
}

impl RemoteRecordStore {
    /// Store over `config` with the default ID codec.
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        Self::with_codec(config, Arc::new(ColonCodec))
    }

    /// Store over `config` with a custom ID codec.
    #[must_use]
    pub fn with_codec(config: RemoteConfig, codec: Arc<dyn IdCodec>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            codec,
        }
    }

    fn content_url(&self, file: &str) -> String {
        format!(
            "{}/contents/{}/{file}",
            self.config.base_url, self.config.prefix
        )
    }

    fn dir_url(&self) -> String {
        format!(
            "{}/contents/{}",
            self.config.base_url, self.config.prefix
        )
    }

    fn file_for(&self, id: &str) -> String {
        format!("{}.json", self.codec.encode(id))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn transport(err: reqwest::Error) -> StoreError {
        StoreError::Backend {
            detail: err.to_string(),
        }
    }

    async fn unexpected(id: &str, response: reqwest::Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT {
            StoreError::ConcurrentUpdate {
                id: id.to_string(),
                detail: body,
            }
        } else {
            StoreError::Backend {
                detail: format!("{status}: {body}"),
            }
        }
    }

    /// Fetch a file's decoded content and blob SHA, or `None` on 404.
    async fn fetch(&self, id: &str) -> Result<Option<(String, String)>, StoreError> {
        let url = self.content_url(&self.file_for(id));
        let response = self
            .request(self.client.get(&url))
            .query(&[("ref", self.config.branch.as_str())])
            .send()
            .await
            .map_err(Self::transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::unexpected(id, response).await);
        }

        let file: ContentFile = response.json().await.map_err(Self::transport)?;
        // Hosted APIs wrap base64 content across lines.
        let packed: String = file.content.split_whitespace().collect();
        let bytes = BASE64.decode(packed).map_err(|err| StoreError::Backend {
            detail: format!("undecodable content for {id}: {err}"),
        })?;
        let text = String::from_utf8(bytes).map_err(|err| StoreError::Backend {
            detail: format!("non-utf8 content for {id}: {err}"),
        })?;
        Ok(Some((text, file.sha)))
    }
}

#[async_trait]
impl RecordStore for RemoteRecordStore {
    async fn put(&self, id: &str, wrapper: &RecordWrapper) -> Result<WriteReceipt, StoreError> {
        // Create-or-update needs the current blob SHA when the file exists.
        let existing_sha = self.fetch(id).await?.map(|(_, sha)| sha);

        let text = wrapper.to_json()?;
        let mut body = serde_json::json!({
            "message": format!("gitgov: put {id}"),
            "content": BASE64.encode(text.as_bytes()),
            "branch": self.config.branch,
        });
        if let Some(sha) = existing_sha {
            body["sha"] = serde_json::Value::String(sha);
        }

        let url = self.content_url(&self.file_for(id));
        let response = self
            .request(self.client.put(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;

        if !response.status().is_success() {
            return Err(Self::unexpected(id, response).await);
        }

        let write: WriteResponse = response.json().await.map_err(Self::transport)?;
        debug!(id, commit = %write.commit.sha, "remote record written");
        Ok(WriteReceipt {
            commit_sha: Some(write.commit.sha),
        })
    }

    async fn get(&self, id: &str) -> Result<Option<RecordWrapper>, StoreError> {
        match self.fetch(id).await? {
            Some((text, _)) => Ok(Some(RecordWrapper::from_json(&text)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut page = 1usize;
        loop {
            let page_param = page.to_string();
            let response = self
                .request(self.client.get(self.dir_url()))
                .query(&[
                    ("ref", self.config.branch.as_str()),
                    ("page", page_param.as_str()),
                ])
                .send()
                .await
                .map_err(Self::transport)?;

            if response.status() == StatusCode::NOT_FOUND {
                // The directory does not exist yet on the branch.
                return Ok(Vec::new());
            }
            if !response.status().is_success() {
                return Err(Self::unexpected("<list>", response).await);
            }

            let entries: Vec<DirEntry> = response.json().await.map_err(Self::transport)?;
            let count = entries.len();
            for entry in entries {
                if entry.kind != "file" {
                    continue;
                }
                let Some(stem) = entry.name.strip_suffix(".json") else {
                    continue;
                };
                if let Some(id) = self.codec.decode(stem) {
                    ids.push(id);
                }
            }
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let Some((_, sha)) = self.fetch(id).await? else {
            return Err(StoreError::NotFound {
                id: id.to_string(),
            });
        };

        let body = serde_json::json!({
            "message": format!("gitgov: delete {id}"),
            "branch": self.config.branch,
            "sha": sha,
        });
        let url = self.content_url(&self.file_for(id));
        let response = self
            .request(self.client.delete(&url))
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;

        if !response.status().is_success() {
            return Err(Self::unexpected(id, response).await);
        }
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.fetch(id).await?.is_some())
    }
}
