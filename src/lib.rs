//! Quill - streaming AI writing assistant for chat channels
//!
//! This library provides an agent that joins a chat channel, decides per
//! message whether fresh web results are needed, and streams its reply into
//! a channel message with progress indicators and stop support.

pub mod adapters;
pub mod agent;
pub mod config;
pub mod error;
pub mod templates;
pub mod tools;

pub use error::{Error, Result};
