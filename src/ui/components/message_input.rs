use thiserror::Error;

use crate::common::MAX_MESSAGE_CHARS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("message is {len} characters; the limit is {MAX_MESSAGE_CHARS}")]
    TooLong { len: usize },
}

/// Message typed into the compose prompt, trimmed and within the length cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    message: Option<String>,
}

impl MessageDraft {
    pub fn parse(input: Option<&str>) -> Result<Self, DraftError> {
        let message = input.map(str::trim).filter(|m| !m.is_empty());
        if let Some(message) = message {
            let len = message.chars().count();
            if len > MAX_MESSAGE_CHARS {
                return Err(DraftError::TooLong { len });
            }
        }
        Ok(Self {
            message: message.map(str::to_string),
        })
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// "n/280 characters" counter shown under the prompt.
    pub fn counter(&self) -> String {
        let len = self.message.as_deref().map_or(0, |m| m.chars().count());
        format!("{len}/{MAX_MESSAGE_CHARS} characters")
    }
}
