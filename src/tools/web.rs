//! Web search via the Tavily API

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use super::SearchProvider;
use crate::config::SearchConfig;

/// Request body for the Tavily search endpoint
#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    search_depth: &'a str,
    max_results: u32,
    include_answer: bool,
    include_raw_content: bool,
}

/// Tavily search adapter
#[derive(Clone)]
pub struct TavilySearch {
    config: SearchConfig,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Whether an API key is configured
    pub fn is_configured(&self) -> bool {
        self.api_key().is_some()
    }

    fn api_key(&self) -> Option<&str> {
        self.config.key()
    }

    async fn request(&self, api_key: &str, query: &str) -> Value {
        let body = SearchRequest {
            query,
            search_depth: &self.config.search_depth,
            max_results: self.config.max_results,
            include_answer: self.config.include_answer,
            include_raw_content: self.config.include_raw_content,
        };

        let response = match self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return exception_payload(query, &e),
        };

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            error!("Tavily search failed for query {:?}: {}", query, details);
            return json!({
                "error": format!("Search failed with status: {}", status.as_u16()),
                "details": details,
            });
        }

        match response.json::<Value>().await {
            Ok(data) => {
                info!("Tavily search successful for query {:?}", query);
                data
            }
            Err(e) => exception_payload(query, &e),
        }
    }
}

fn exception_payload(query: &str, e: &reqwest::Error) -> Value {
    error!("An exception occurred during web search for {:?}: {}", query, e);
    json!({
        "error": "An exception occurred during the search.",
        "message": e.to_string(),
    })
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str) -> String {
        let Some(api_key) = self.api_key() else {
            return json!({
                "error": "Web search is not available. API key not configured.",
            })
            .to_string();
        };

        info!("Performing web search for: {:?}", query);
        self.request(api_key, query).await.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: String, api_key: Option<&str>) -> SearchConfig {
        SearchConfig {
            api_key: api_key.map(str::to_string),
            endpoint,
            ..SearchConfig::default()
        }
    }

    fn parse(payload: &str) -> Value {
        serde_json::from_str(payload).unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_returns_error_payload() {
        let search = TavilySearch::new(config("http://127.0.0.1:9".to_string(), None));
        assert!(!search.is_configured());

        let payload = parse(&search.search("latest news").await);
        assert_eq!(
            payload["error"],
            "Web search is not available. API key not configured."
        );
    }

    #[tokio::test]
    async fn test_successful_search_is_passed_through() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("authorization", "Bearer tv-key"))
            .and(body_json(json!({
                "query": "Paris weather today",
                "search_depth": "advanced",
                "max_results": 5,
                "include_answer": true,
                "include_raw_content": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "answer": "Sunny, 21°C",
                "results": [{"title": "Forecast", "url": "https://weather.example/paris"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let search = TavilySearch::new(config(format!("{}/search", server.uri()), Some("tv-key")));
        let payload = parse(&search.search("Paris weather today").await);

        assert_eq!(payload["answer"], "Sunny, 21°C");
        assert_eq!(payload["results"][0]["url"], "https://weather.example/paris");
    }

    #[tokio::test]
    async fn test_error_status_captures_code_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(432).set_body_string("plan limit exceeded"))
            .mount(&server)
            .await;

        let search = TavilySearch::new(config(format!("{}/search", server.uri()), Some("tv-key")));
        let payload = parse(&search.search("anything").await);

        assert_eq!(payload["error"], "Search failed with status: 432");
        assert_eq!(payload["details"], "plan limit exceeded");
    }

    #[tokio::test]
    async fn test_transport_failure_captures_message() {
        // Nothing listens on the discard port.
        let search = TavilySearch::new(config("http://127.0.0.1:9/search".to_string(), Some("tv-key")));
        let payload = parse(&search.search("anything").await);

        assert_eq!(payload["error"], "An exception occurred during the search.");
        assert!(payload["message"].as_str().is_some_and(|m| !m.is_empty()));
    }
}
