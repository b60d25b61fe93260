//! Contract for the remote image generator. `Ok(None)` is a soft decline.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum GenerationError {
    #[error("rate limited by image service")]
    RateLimited,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid generation input: {0}")]
    InvalidInput(String),
}

impl GenerationError {
    /// Message shown to the user alongside the retry action.
    pub fn user_message(&self) -> &'static str {
        match self {
            GenerationError::RateLimited => "The styling service is busy right now. Please wait a minute and try again.",
            GenerationError::Transport(_) | GenerationError::InvalidInput(_) => "Something went wrong while generating. Please try again later.",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest<'a> {
    pub source_image: &'a str,
    pub mime_type: &'a str,
    pub prompt: &'a str,
    pub reference_image: Option<&'a str>,
}

impl GenerationRequest<'_> {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.source_image.trim().is_empty() {
            return Err(GenerationError::InvalidInput("source image is empty".into()));
        }
        if self.prompt.trim().is_empty() {
            return Err(GenerationError::InvalidInput("prompt is empty".into()));
        }
        Ok(())
    }
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Option<String>, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_are_rejected() {
        let req = GenerationRequest { source_image: "", mime_type: "image/png", prompt: "bob", reference_image: None };
        assert!(matches!(req.validate(), Err(GenerationError::InvalidInput(_))));
        let req = GenerationRequest { source_image: "abc", mime_type: "image/png", prompt: "  ", reference_image: None };
        assert!(matches!(req.validate(), Err(GenerationError::InvalidInput(_))));
        let req = GenerationRequest { source_image: "abc", mime_type: "image/png", prompt: "bob", reference_image: None };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rate_limit_has_distinct_message() {
        assert_ne!(GenerationError::RateLimited.user_message(), GenerationError::Transport("x".into()).user_message());
    }
}
