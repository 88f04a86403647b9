//! Prompt composition and language-model clients for health-query.

pub mod client;
pub mod error;
pub mod prompt;

pub use client::{create_client, LlmClient, LlmConfig, OllamaClient, OpenAiClient};
pub use error::LlmError;
pub use prompt::{Prompt, Query, QueryComposer};
