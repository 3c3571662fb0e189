//! HTTP client for the chat service REST API
//!
//! Covers chat CRUD and task-handler discovery. Authentication is a bearer
//! token installed as a default header at construction time.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::types::{Chat, Message, TaskHandler};

/// A chat together with its full message tree, from GET /chats/{id}
#[derive(Debug, Deserialize)]
pub struct ChatWithMessages {
    #[serde(flatten)]
    pub chat: Chat,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// One page of chats, from GET /chats
#[derive(Debug, Deserialize)]
pub struct ChatPage {
    pub chats: Vec<Chat>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// HTTP client for the chat service
pub struct ChatApiClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ChatApiClient {
    /// Create a client from configuration.
    ///
    /// Returns an error if the configuration is invalid or missing required
    /// fields.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| Error::Config("api.base_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Create a new chat
    pub async fn create_chat(&self, title: &str) -> Result<Chat> {
        let url = format!("{}/chats", self.base_url);
        let request = CreateChatRequest { title };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Api(format!("HTTP request failed: {}", e)))?;

        parse_json(response).await
    }

    /// Fetch a chat with its complete message tree.
    ///
    /// Returns None if the chat does not exist.
    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatWithMessages>> {
        let url = format!("{}/chats/{}", self.base_url, chat_id);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Api(format!("HTTP request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_json(response).await.map(Some)
    }

    /// List chats, newest first. `next_token` continues a previous page.
    pub async fn list_chats(&self, next_token: Option<&str>) -> Result<ChatPage> {
        let mut url = format!("{}/chats", self.base_url);
        if let Some(token) = next_token {
            url = format!("{}?next_token={}", url, token);
        }

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Api(format!("HTTP request failed: {}", e)))?;

        parse_json(response).await
    }

    /// Rename a chat
    pub async fn update_chat(&self, chat_id: &str, title: &str) -> Result<Chat> {
        let url = format!("{}/chats/{}", self.base_url, chat_id);
        let request = UpdateChatRequest { title };

        let response = self
            .http_client
            .put(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Api(format!("HTTP request failed: {}", e)))?;

        parse_json(response).await
    }

    /// Delete a chat and all its messages.
    ///
    /// Returns false if the chat did not exist.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        let url = format!("{}/chats/{}", self.base_url, chat_id);

        let response = self
            .http_client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Error::Api(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(api_error(response).await)
        }
    }

    /// List available task handlers with their models
    pub async fn list_task_handlers(&self) -> Result<Vec<TaskHandler>> {
        let url = format!("{}/task-handlers", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Api(format!("HTTP request failed: {}", e)))?;

        let page: TaskHandlerPage = parse_json(response).await?;
        Ok(page.handlers)
    }

    /// Check whether the service is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);

        match self.http_client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

/// Parse a success body, or surface the error body as an API error
async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| Error::Api(format!("failed to parse response: {}", e)))
    } else {
        Err(api_error(response).await)
    }
}

async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    Error::Api(format!("API error ({}): {}", status, error_text))
}

/// Request body for POST /chats
#[derive(Serialize)]
struct CreateChatRequest<'a> {
    title: &'a str,
}

/// Request body for PUT /chats/{chat_id}
#[derive(Serialize)]
struct UpdateChatRequest<'a> {
    title: &'a str,
}

/// Response body for GET /task-handlers
#[derive(Deserialize)]
struct TaskHandlerPage {
    #[serde(default)]
    handlers: Vec<TaskHandler>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_base_url() {
        let config = ApiConfig::default();
        assert!(ChatApiClient::new(&config).is_err());
    }

    #[test]
    fn test_client_with_valid_config() {
        let config = ApiConfig {
            base_url: Some("https://workbench.example.com/api/v1/".to_string()),
            api_key: Some("wb_test_key".to_string()),
            timeout_secs: 5,
        };
        let client = ChatApiClient::new(&config).unwrap();
        assert_eq!(client.base_url, "https://workbench.example.com/api/v1");
    }

    #[test]
    fn test_chat_with_messages_deserializes_flat() {
        let body = serde_json::json!({
            "chat_id": "c1",
            "title": "Quarterly report",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-02T00:00:00Z",
            "messages": []
        });
        let parsed: ChatWithMessages = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.chat.chat_id, "c1");
        assert!(parsed.messages.is_empty());
    }
}
