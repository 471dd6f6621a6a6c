//! Normalized gateway events handed to the session engine.

use serde::{Deserialize, Serialize};

use crate::message::ImageRef;

/// Where an event happened on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelContext {
    /// The channel the user typed in.
    pub channel_id: String,

    /// Set when the channel is one of our conversation threads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl ChannelContext {
    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            thread_id: None,
        }
    }

    pub fn thread(parent_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            channel_id: parent_id.into(),
            thread_id: Some(thread_id.into()),
        }
    }
}

/// "User asked X", as delivered by the platform's dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub user_id: String,
    pub display_name: String,
    pub channel: ChannelContext,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    /// A new top-level question rather than a follow-up in a thread.
    #[serde(default)]
    pub is_new_session: bool,
    /// Requested answer language, overriding the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl GatewayEvent {
    /// A new question asked in `channel_id`.
    pub fn ask(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        channel_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            channel: ChannelContext::channel(channel_id),
            text: text.into(),
            image: None,
            is_new_session: true,
            language: None,
        }
    }

    /// A follow-up typed inside an existing thread.
    pub fn reply(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        parent_id: impl Into<String>,
        thread_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            channel: ChannelContext::thread(parent_id, thread_id),
            text: text.into(),
            image: None,
            is_new_session: false,
            language: None,
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Mark a thread event as a new session, i.e. a reset in place.
    pub fn renewing(mut self) -> Self {
        self.is_new_session = true;
        self
    }
}
