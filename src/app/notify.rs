//! Best-effort push delivery. Nothing here ever fails a request.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;

use crate::{config::PushConfig, users::UserDirectory};

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("push request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("push service rejected message: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl PushMessage {
    /// Message for an owner whose item just gained `count` matches.
    pub fn new_matches(item_name: &str, item_id: &str, count: usize) -> Self {
        let noun = if count == 1 { "match" } else { "matches" };
        Self {
            title: format!("New Match for {item_name}"),
            body: format!("Your {item_name} has {count} new possible {noun}"),
            data: serde_json::json!({ "item_id": item_id }),
        }
    }
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, push_token: &str, message: &PushMessage) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct ExpoMessage<'a> {
    to: &'a str,
    sound: &'static str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
}

pub struct ExpoPush {
    client: reqwest::Client,
    endpoint: String,
}

impl ExpoPush {
    pub fn new(config: &PushConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl PushSender for ExpoPush {
    async fn send(&self, push_token: &str, message: &PushMessage) -> Result<(), NotifyError> {
        let payload = ExpoMessage {
            to: push_token,
            sound: "default",
            title: &message.title,
            body: &message.body,
            data: &message.data,
        };

        let response: serde_json::Value = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // ticket errors come back with a 200
        if response["data"]["status"] == "error" {
            let reason = response["data"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string();
            return Err(NotifyError::Rejected(reason));
        }

        Ok(())
    }
}

/// Used when `push.enabled` is off.
pub struct DisabledPush;

#[async_trait]
impl PushSender for DisabledPush {
    async fn send(&self, _push_token: &str, message: &PushMessage) -> Result<(), NotifyError> {
        log::debug!("push disabled, dropping {:?}", message.title);
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    users: Arc<dyn UserDirectory>,
    sender: Arc<dyn PushSender>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(users: Arc<dyn UserDirectory>, sender: Arc<dyn PushSender>, timeout: Duration) -> Self {
        Self {
            users,
            sender,
            timeout,
        }
    }

    /// Pushes `message` to the owner of `owner_mail` if they registered a push
    /// token. Returns whether the push service accepted it.
    pub async fn notify_owner(&self, owner_mail: &str, message: PushMessage) -> bool {
        let owner = match tokio::time::timeout(self.timeout, self.users.find_by_mail(owner_mail)).await {
            Ok(Ok(Some(owner))) => owner,
            Ok(Ok(None)) => {
                log::debug!("no user record for {owner_mail}, skipping push");
                return false;
            }
            Ok(Err(err)) => {
                log::warn!("failed to look up {owner_mail} for push: {err:#}");
                return false;
            }
            Err(_) => {
                log::warn!("timed out looking up {owner_mail} for push");
                return false;
            }
        };

        let Some(token) = owner.push_token.as_deref().filter(|t| !t.is_empty()) else {
            log::debug!("{owner_mail} has no push token");
            return false;
        };

        match tokio::time::timeout(self.timeout, self.sender.send(token, &message)).await {
            Ok(Ok(())) => {
                log::info!("pushed {:?} to {owner_mail}", message.title);
                true
            }
            Ok(Err(err)) => {
                log::warn!("push to {owner_mail} failed: {err}");
                false
            }
            Err(_) => {
                log::warn!("push to {owner_mail} timed out");
                false
            }
        }
    }
}
