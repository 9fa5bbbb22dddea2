use serde::{Deserialize, Serialize};

/// Platform metadata sent with Identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl ConnectionProperties {
    /// Properties for the running platform
    pub fn current(browser: &str, device: &str) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: browser.to_string(),
            device: device.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Identify {
    pub token: String,
    pub properties: ConnectionProperties,
    pub intents: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    /// Null when nothing has been received yet
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    /// Milliseconds
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub user: Option<ReadyUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyUser {
    pub id: String,
}

/// Body of a create-message REST call
#[derive(Debug, Clone, Serialize)]
pub struct CreateMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl CreateMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            nonce: None,
        }
    }
}
