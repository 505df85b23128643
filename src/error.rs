use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum Error {
    /// The subscription or session behind a topic is gone.
    #[error("connection lost on {topic}: {reason}")]
    Connection { topic: String, reason: String },

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("malformed message on {topic}: {reason}")]
    Message { topic: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("task {name} failed: {reason}")]
    Task { name: String, reason: String },
}

impl Error {
    pub fn connection(topic: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    pub fn message(topic: impl Into<String>, reason: impl ToString) -> Self {
        Self::Message {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    pub fn publish(topic: impl Into<String>, reason: impl ToString) -> Self {
        Self::Publish {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that end a single message's processing but not the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Message { .. } | Self::Publish { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
