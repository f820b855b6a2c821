//! Sequential LLM classification pipeline with per-entry retry/backoff and
//! batch-level failure recovery, served as background runs over HTTP.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod jobs;
pub mod openai_engine;
pub mod retry;
pub mod server;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;
