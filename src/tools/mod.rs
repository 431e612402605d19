//! Tools module - external lookups the agent can perform
//!
//! Currently a single capability: web search, used to ground replies that
//! depend on current information.

mod web;

pub use web::TavilySearch;

use async_trait::async_trait;

/// Search provider trait - interface for web search backends
///
/// Implementations never fail: every problem (missing key, bad status,
/// transport error) is returned as a serialized JSON object with an
/// `error` field, so the caller can hand the payload to the model as-is.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Run one search and return the serialized result payload
    async fn search(&self, query: &str) -> String;
}

/// Search provider that records queries and returns a fixed payload
#[cfg(test)]
pub struct FakeSearch {
    pub payload: String,
    pub queries: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl FakeSearch {
    pub fn new(payload: &str) -> Self {
        Self {
            payload: payload.to_string(),
            queries: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(&self, query: &str) -> String {
        self.queries.lock().unwrap().push(query.to_string());
        self.payload.clone()
    }
}
