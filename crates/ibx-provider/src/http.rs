//! HTTP implementation of [`EmailProvider`] against a Nylas-style v3 API.
//!
//! Endpoint shape: `{base}/v3/grants/{grant_id}/threads` and
//! `.../messages`, bearer-token auth, `{ "data": [...], "next_cursor": ... }`
//! response envelopes. A 404 on a single-object fetch is a clean `Ok(None)`.

use std::time::Duration;

use serde::Deserialize;

use crate::{
    EmailProvider, ListThreadsQuery, ProviderError, RemoteMessage, RemoteThread, ThreadPage,
};

pub const ENV_PROVIDER_BASE_URL: &str = "IBX_PROVIDER_BASE_URL";
pub const ENV_PROVIDER_API_KEY: &str = "IBX_PROVIDER_API_KEY";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpEmailProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectEnvelope<T> {
    data: T,
}

impl HttpEmailProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::Config("provider api key is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Config(format!("http client build failed: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Construct from `IBX_PROVIDER_BASE_URL` / `IBX_PROVIDER_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let base = std::env::var(ENV_PROVIDER_BASE_URL)
            .map_err(|_| ProviderError::Config(format!("missing env var {ENV_PROVIDER_BASE_URL}")))?;
        let key = std::env::var(ENV_PROVIDER_API_KEY)
            .map_err(|_| ProviderError::Config(format!("missing env var {ENV_PROVIDER_API_KEY}")))?;
        Self::new(base, key)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<Option<T>, ProviderError> {
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        serde_json::from_str::<T>(&body)
            .map(Some)
            .map_err(|e| ProviderError::Decode(format!("{e} (url={url})")))
    }
}

#[async_trait::async_trait]
impl EmailProvider for HttpEmailProvider {
    fn name(&self) -> &'static str {
        "nylas"
    }

    async fn list_threads(
        &self,
        grant_id: &str,
        query: &ListThreadsQuery,
    ) -> Result<ThreadPage, ProviderError> {
        let url = format!("{}/v3/grants/{}/threads", self.base_url, grant_id);

        let mut params: Vec<(&str, String)> = vec![("limit", query.limit.to_string())];
        if let Some(after) = query.after_ts {
            params.push(("latest_message_after", after.to_string()));
        }
        if let Some(before) = query.before_ts {
            params.push(("latest_message_before", before.to_string()));
        }
        if let Some(token) = &query.page_token {
            params.push(("page_token", token.clone()));
        }

        let envelope: ListEnvelope<RemoteThread> = self
            .get_json(url, &params)
            .await?
            .ok_or_else(|| ProviderError::Api {
                status: Some(404),
                message: "thread listing endpoint not found".into(),
            })?;

        Ok(ThreadPage {
            data: envelope.data,
            next_cursor: envelope.next_cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn find_thread(
        &self,
        grant_id: &str,
        remote_thread_id: &str,
    ) -> Result<Option<RemoteThread>, ProviderError> {
        let url = format!(
            "{}/v3/grants/{}/threads/{}",
            self.base_url, grant_id, remote_thread_id
        );
        let envelope: Option<ObjectEnvelope<RemoteThread>> = self.get_json(url, &[]).await?;
        Ok(envelope.map(|e| e.data))
    }

    async fn list_messages(
        &self,
        grant_id: &str,
        remote_thread_id: &str,
        limit: i32,
    ) -> Result<Vec<RemoteMessage>, ProviderError> {
        let url = format!("{}/v3/grants/{}/messages", self.base_url, grant_id);
        let params: Vec<(&str, String)> = vec![
            ("thread_id", remote_thread_id.to_string()),
            ("limit", limit.to_string()),
        ];

        let envelope: Option<ListEnvelope<RemoteMessage>> = self.get_json(url, &params).await?;
        Ok(envelope.map(|e| e.data).unwrap_or_default())
    }

    async fn find_message(
        &self,
        grant_id: &str,
        remote_message_id: &str,
    ) -> Result<Option<RemoteMessage>, ProviderError> {
        let url = format!(
            "{}/v3/grants/{}/messages/{}",
            self.base_url, grant_id, remote_message_id
        );
        let envelope: Option<ObjectEnvelope<RemoteMessage>> = self.get_json(url, &[]).await?;
        Ok(envelope.map(|e| e.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_a_config_error() {
        let err = HttpEmailProvider::new("https://api.example.com", "")
            .err()
            .expect("empty key must be rejected");
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let p = HttpEmailProvider::new("https://api.example.com/", "key").unwrap();
        assert_eq!(p.base_url, "https://api.example.com");
    }

    #[test]
    fn list_envelope_tolerates_missing_cursor() {
        let env: ListEnvelope<RemoteThread> =
            serde_json::from_value(serde_json::json!({ "data": [] })).unwrap();
        assert!(env.data.is_empty());
        assert!(env.next_cursor.is_none());
    }
}
