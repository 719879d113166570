use super::commands::{InboundCommand, OperatorChannel};
use super::AlertBackend;
use async_trait::async_trait;
use harvester_core::config::AlertsConfig;
use harvester_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<Sender>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Sender {
    id: i64,
}

/// Telegram Bot API client: outbound alerts and inbound operator commands.
pub struct TelegramBot {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramBot {
    pub fn new(config: &AlertsConfig, token: &str) -> Result<Self> {
        // Long polls must outlive the server-side wait
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 10))
            .build()?;

        Ok(Self {
            http,
            base_url: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let parsed: ApiResponse<T> = resp.json().await?;
        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(Error::Alert(format!(
                "{method} failed (status {status}): {}",
                description.unwrap_or_default()
            ))),
        }
    }
}

#[async_trait]
impl AlertBackend for TelegramBot {
    async fn send_message(&self, destination: i64, text: &str) -> Result<()> {
        self.call::<serde_json::Value>("sendMessage", json!({ "chat_id": destination, "text": text }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OperatorChannel for TelegramBot {
    async fn poll_commands(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<InboundCommand>> {
        let mut body = json!({
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }

        let updates: Vec<Update> = self.call("getUpdates", body).await?;
        Ok(updates
            .into_iter()
            .map(|update| {
                let message = update.message;
                InboundCommand {
                    update_id: update.update_id,
                    chat_id: message.as_ref().map(|m| m.chat.id),
                    sender_id: message.as_ref().and_then(|m| m.from.as_ref()).map(|s| s.id),
                    text: message.and_then(|m| m.text).unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn update_payload_parses() {
        let raw = r#"{
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"message_id": 1, "chat": {"id": 55, "type": "private"}, "from": {"id": 77, "is_bot": false}, "text": "/stats"}},
                {"update_id": 11, "edited_message": {"chat": {"id": 55}}}
            ]
        }"#;

        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let updates = parsed.result.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].message.as_ref().unwrap().chat.id, 55);
        assert_eq!(updates[0].message.as_ref().unwrap().text.as_deref(), Some("/stats"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn token_is_part_of_the_base_url() {
        let config = harvester_core::Config::default().alerts;
        let bot = TelegramBot::new(&config, "123:abc").unwrap();
        assert_eq!(bot.base_url, "https://api.telegram.org/bot123:abc");
    }
}
