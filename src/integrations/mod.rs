//! External integrations module.
//!
//! Provides the OpenAI-compatible chat client used by the hierarchy oracle,
//! the LLM summarizer, and answer generation.

pub mod openai;

pub use openai::{ChatMessage, OpenAIClient};
