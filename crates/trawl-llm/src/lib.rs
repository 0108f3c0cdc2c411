//! Embedding provider abstraction and the OpenAI-compatible backend.

pub mod embedder;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;

pub use embedder::Embedder;
pub use error::LlmError;
