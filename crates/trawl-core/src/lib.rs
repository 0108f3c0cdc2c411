//! Configuration loading and the wiring that turns it into running components.

pub mod bootstrap;
pub mod config;

pub use bootstrap::{App, build_app, openai_embedder};
pub use config::Config;
