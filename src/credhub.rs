// Credential operations against /api/v1/data

use anyhow::Context;
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::error::{CliError, Result};
use crate::models::{Credential, CredentialList, FindResults, PathResults, SetRequest};
use crate::pipeline::RequestPipeline;
use crate::transport::TransportResponse;

const DATA_PATH: &str = "/api/v1/data";

/// CredHub API client; every call goes through the authenticated pipeline
pub struct CredHub {
    pipeline: RequestPipeline,
}

impl CredHub {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    /// Credential version by ID
    pub async fn get_by_id(&mut self, id: &str) -> Result<Credential> {
        self.first_credential(&[("id", id)]).await
    }

    /// Current version of a credential
    pub async fn get_latest_version(&mut self, name: &str) -> Result<Credential> {
        self.first_credential(&[("name", name), ("versions", "1")])
            .await
    }

    /// The `n` most recent versions, newest first
    pub async fn get_n_versions(&mut self, name: &str, n: u32) -> Result<Vec<Credential>> {
        let versions = n.to_string();
        self.credentials(&[("name", name), ("versions", versions.as_str())])
            .await
    }

    /// Every version of a credential
    pub async fn get_all_versions(&mut self, name: &str) -> Result<Vec<Credential>> {
        self.credentials(&[("name", name)]).await
    }

    /// Write a new credential version
    pub async fn set(
        &mut self,
        name: &str,
        credential_type: &str,
        value: &serde_json::Value,
    ) -> Result<Credential> {
        let body = serde_json::to_value(SetRequest {
            name,
            credential_type,
            value,
        })
        .context("Failed to encode credential")?;

        let response = self
            .pipeline
            .execute(Method::PUT, DATA_PATH, &[], Some(&body))
            .await?;
        decode(&response)
    }

    /// Delete every version of a credential
    pub async fn delete(&mut self, name: &str) -> Result<()> {
        self.pipeline
            .execute(Method::DELETE, DATA_PATH, &[("name", name)], None)
            .await?;
        Ok(())
    }

    /// Credentials whose name contains `name_like`
    pub async fn find_by_name(&mut self, name_like: &str) -> Result<FindResults> {
        let response = self
            .pipeline
            .execute(Method::GET, DATA_PATH, &[("name-like", name_like)], None)
            .await?;
        decode(&response)
    }

    /// Credentials under `path`
    pub async fn find_by_path(&mut self, path: &str) -> Result<FindResults> {
        let response = self
            .pipeline
            .execute(Method::GET, DATA_PATH, &[("path", path)], None)
            .await?;
        decode(&response)
    }

    /// Every credential path the caller can see
    pub async fn find_all_paths(&mut self) -> Result<PathResults> {
        let response = self
            .pipeline
            .execute(Method::GET, DATA_PATH, &[("paths", "true")], None)
            .await?;
        decode(&response)
    }

    async fn credentials(&mut self, query: &[(&str, &str)]) -> Result<Vec<Credential>> {
        let response = self
            .pipeline
            .execute(Method::GET, DATA_PATH, query, None)
            .await?;
        let list: CredentialList = decode(&response)?;

        if list.data.is_empty() {
            return Err(CliError::Internal(anyhow::anyhow!(
                "response did not contain any credentials"
            )));
        }
        Ok(list.data)
    }

    async fn first_credential(&mut self, query: &[(&str, &str)]) -> Result<Credential> {
        let mut data = self.credentials(query).await?;
        Ok(data.swap_remove(0))
    }
}

fn decode<T: DeserializeOwned>(response: &TransportResponse) -> Result<T> {
    response
        .json()
        .context("Failed to parse CredHub response")
        .map_err(CliError::from)
}
