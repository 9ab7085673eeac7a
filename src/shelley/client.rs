use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;

use super::models::{ModelList, StartResponse};

/// The narrow backend surface the filesystem core consumes.
///
/// List and detail calls return raw body bytes; the caller owns decoding so
/// the parsed-message cache can content-address the exact bytes it was fed.
#[async_trait]
pub trait ShelleyClient: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<u8>>;
    async fn list_archived_conversations(&self) -> Result<Vec<u8>>;
    async fn get_conversation(&self, remote_id: &str) -> Result<Vec<u8>>;
    async fn start_conversation(
        &self,
        message: &str,
        model_internal: &str,
        cwd: Option<&str>,
    ) -> Result<StartResponse>;
    async fn send_message(&self, remote_id: &str, message: &str, model_internal: &str)
    -> Result<()>;
    async fn is_conversation_archived(&self, remote_id: &str) -> Result<bool>;
    async fn archive_conversation(&self, remote_id: &str) -> Result<()>;
    async fn unarchive_conversation(&self, remote_id: &str) -> Result<()>;
    async fn list_models(&self) -> Result<ModelList>;
}

pub struct HttpShelleyClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpShelleyClient {
    pub fn new(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check(resp: Response, what: &str) -> Result<Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("shelley API error {status} {what}: {body}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl ShelleyClient for HttpShelleyClient {
    async fn list_conversations(&self) -> Result<Vec<u8>> {
        let resp = self
            .auth(self.client.get(self.url("/api/conversations")))
            .send()
            .await
            .context("failed to list conversations")?;
        let resp = Self::check(resp, "listing conversations").await?;
        Ok(resp.bytes().await.context("failed to read list body")?.to_vec())
    }

    async fn list_archived_conversations(&self) -> Result<Vec<u8>> {
        let resp = self
            .auth(self.client.get(self.url("/api/conversations/archived")))
            .send()
            .await
            .context("failed to list archived conversations")?;
        let resp = Self::check(resp, "listing archived conversations").await?;
        Ok(resp.bytes().await.context("failed to read list body")?.to_vec())
    }

    async fn get_conversation(&self, remote_id: &str) -> Result<Vec<u8>> {
        let url = self.url(&format!("/api/conversations/{remote_id}"));
        let resp = self
            .auth(self.client.get(&url))
            .send()
            .await
            .context("failed to fetch conversation")?;
        let resp = Self::check(resp, &format!("fetching conversation {remote_id}")).await?;
        Ok(resp
            .bytes()
            .await
            .context("failed to read conversation body")?
            .to_vec())
    }

    async fn start_conversation(
        &self,
        message: &str,
        model_internal: &str,
        cwd: Option<&str>,
    ) -> Result<StartResponse> {
        let mut payload = json!({ "message": message, "model": model_internal });
        if let Some(cwd) = cwd {
            payload["cwd"] = json!(cwd);
        }
        let resp = self
            .auth(self.client.post(self.url("/api/conversations")))
            .json(&payload)
            .send()
            .await
            .context("failed to start conversation")?;
        let resp = Self::check(resp, "starting conversation").await?;
        resp.json().await.context("failed to parse start response")
    }

    async fn send_message(
        &self,
        remote_id: &str,
        message: &str,
        model_internal: &str,
    ) -> Result<()> {
        let url = self.url(&format!("/api/conversations/{remote_id}/messages"));
        let payload = json!({ "message": message, "model": model_internal });
        let resp = self
            .auth(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .context("failed to send message")?;
        Self::check(resp, &format!("sending message to {remote_id}")).await?;
        Ok(())
    }

    async fn is_conversation_archived(&self, remote_id: &str) -> Result<bool> {
        let url = self.url(&format!("/api/conversations/{remote_id}/archived"));
        let resp = self
            .auth(self.client.get(&url))
            .send()
            .await
            .context("failed to query archived status")?;
        let resp = Self::check(resp, &format!("querying archived status of {remote_id}")).await?;
        #[derive(serde::Deserialize)]
        struct Archived {
            archived: bool,
        }
        let body: Archived = resp.json().await.context("failed to parse archived status")?;
        Ok(body.archived)
    }

    async fn archive_conversation(&self, remote_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/conversations/{remote_id}/archived"));
        let resp = self
            .auth(self.client.put(&url))
            .send()
            .await
            .context("failed to archive conversation")?;
        Self::check(resp, &format!("archiving {remote_id}")).await?;
        Ok(())
    }

    async fn unarchive_conversation(&self, remote_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/conversations/{remote_id}/archived"));
        let resp = self
            .auth(self.client.delete(&url))
            .send()
            .await
            .context("failed to unarchive conversation")?;
        Self::check(resp, &format!("unarchiving {remote_id}")).await?;
        Ok(())
    }

    async fn list_models(&self) -> Result<ModelList> {
        let resp = self
            .auth(self.client.get(self.url("/api/models")))
            .send()
            .await
            .context("failed to list models")?;
        let resp = Self::check(resp, "listing models").await?;
        resp.json().await.context("failed to parse model list")
    }
}
