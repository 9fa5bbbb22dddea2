//! REST calls issued through the transport

use crate::domain::CreateMessage;
use crate::error::Result;
use muse_transport::{HttpResponse, RequestId, Transport};

#[derive(Debug, Clone)]
pub struct RestClient {
    api_url: String,
    authorization: String,
}

impl RestClient {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            authorization: format!("Bot {}", token),
        }
    }

    pub fn channel_messages_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{}/messages", self.api_url, channel_id)
    }

    /// POST a message to a channel; `callback` runs once with the response.
    pub fn send_message<F>(
        &self,
        transport: &mut Transport,
        channel_id: &str,
        message: &CreateMessage,
        callback: F,
    ) -> Result<RequestId>
    where
        F: FnOnce(&mut Transport, HttpResponse<'_>) + 'static,
    {
        let url = self.channel_messages_url(channel_id);
        let id = transport.http_post_json(
            &url,
            message,
            &[("Authorization", self.authorization.as_str())],
            callback,
        )?;
        Ok(id)
    }
}
