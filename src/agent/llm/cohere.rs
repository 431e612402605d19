//! Cohere LLM client implementation (API key authentication).

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::Error;
use crate::Result;

use super::super::message::{Role, Turn};
use super::{
    ChatRequest, CohereChatBody, CohereChatResponse, CohereStreamLine, CohereTurn, EventStream,
    LlmClient, StreamEvent,
};

const COHERE_API_URL: &str = "https://api.cohere.ai";

/// Cohere chat API client.
#[derive(Clone)]
pub struct CohereClient {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl CohereClient {
    /// Create a new Cohere client with API key.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: COHERE_API_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Point the client at another host (used against mock servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_url(&self) -> String {
        format!("{}/v1/chat", self.base_url.trim_end_matches('/'))
    }

    fn convert_history(history: &[Turn]) -> Vec<CohereTurn<'_>> {
        history
            .iter()
            .map(|t| CohereTurn {
                role: match t.role {
                    Role::User => "USER",
                    Role::Assistant => "CHATBOT",
                },
                message: &t.text,
            })
            .collect()
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let model = if request.model.is_empty() {
            self.model.as_str()
        } else {
            request.model.as_str()
        };

        let body = CohereChatBody {
            model,
            message: &request.message,
            preamble: request.preamble.as_deref(),
            chat_history: Self::convert_history(&request.chat_history),
            temperature: request.temperature,
            stream,
        };

        let response = self
            .client
            .post(self.build_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(Error::Llm(format!(
                "Cohere API error ({}): {}",
                status.as_u16(),
                error_text
            )));
        }

        Ok(response)
    }
}

/// Splits a byte stream into lines.
///
/// Bytes are held until a newline arrives, so a multi-byte character split
/// across network chunks is decoded whole.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Whatever is left after the stream ends.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Convert one NDJSON line into a stream event.
///
/// Returns `None` for blank or unparseable lines.
fn parse_stream_line(line: &str) -> Option<Result<StreamEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parsed: CohereStreamLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Skipping malformed Cohere stream line: {}", e);
            return None;
        }
    };

    let event = match parsed.event_type.as_str() {
        "stream-start" => StreamEvent::StreamStart,
        "text-generation" => StreamEvent::TextGeneration {
            text: parsed.text.unwrap_or_default(),
        },
        "stream-end" => {
            if parsed.finish_reason.as_deref() == Some("ERROR") {
                return Some(Err(Error::Llm("Cohere stream ended with an error".to_string())));
            }
            StreamEvent::StreamEnd {
                finish_reason: parsed.finish_reason,
            }
        }
        other => StreamEvent::Other {
            event_type: other.to_string(),
        },
    };

    Some(Ok(event))
}

#[async_trait]
impl LlmClient for CohereClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        debug!("Cohere chat with model {}", request.model);
        let response = self.send(request, false).await?;
        let body: CohereChatResponse = response.json().await?;
        Ok(body.text)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<EventStream> {
        debug!("Cohere chat stream with model {}", request.model);
        let response = self.send(request, true).await?;
        let byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = LineBuffer::default();
            futures_util::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(Error::Http(e));
                        break;
                    }
                };

                for line in buffer.push(&chunk) {
                    if let Some(event) = parse_stream_line(&line) {
                        yield event;
                    }
                }
            }

            if let Some(event) = buffer.finish().as_deref().and_then(parse_stream_line) {
                yield event;
            }
        };

        Ok(Box::pin(stream))
    }

    fn ensure_credentials(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("Cohere API key is required".to_string()));
        }
        Ok(())
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_stream_line() {
        let event = parse_stream_line(r#"{"event_type":"text-generation","text":"Hi"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, StreamEvent::TextGeneration { text: "Hi".to_string() });

        assert!(parse_stream_line("   ").is_none());
        assert!(parse_stream_line("not json").is_none());
        assert!(parse_stream_line(r#"{"event_type":"stream-end","finish_reason":"ERROR"}"#)
            .unwrap()
            .is_err());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let client = CohereClient::new("", "command-r-plus");
        assert!(matches!(client.ensure_credentials(), Err(Error::Config(_))));
        assert!(CohereClient::new("key", "command-r-plus").ensure_credentials().is_ok());
    }

    #[tokio::test]
    async fn test_chat_sends_history_and_preamble() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "command-r-plus",
                "message": "And now?",
                "preamble": "Be brief.",
                "stream": false,
                "chat_history": [
                    {"role": "USER", "message": "Hello"},
                    {"role": "CHATBOT", "message": "Hi there"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "{\"needsSearch\": false, \"query\": \"\"}",
                "generation_id": "abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CohereClient::new("test-key", "command-r-plus").with_base_url(server.uri());
        let request = ChatRequest::new("command-r-plus", "And now?")
            .with_preamble("Be brief.")
            .with_history(vec![Turn::user("Hello"), Turn::assistant("Hi there")]);

        let text = client.chat(&request).await.unwrap();
        assert_eq!(text, "{\"needsSearch\": false, \"query\": \"\"}");
    }

    #[tokio::test]
    async fn test_chat_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api token"))
            .mount(&server)
            .await;

        let client = CohereClient::new("bad", "command-r-plus").with_base_url(server.uri());
        let err = client
            .chat(&ChatRequest::new("command-r-plus", "Hi"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("invalid api token"));
    }

    #[tokio::test]
    async fn test_chat_stream_parses_ndjson() {
        let server = MockServer::start().await;

        let body = [
            r#"{"is_finished":false,"event_type":"stream-start","generation_id":"g1"}"#,
            r#"{"is_finished":false,"event_type":"text-generation","text":"Hello"}"#,
            r#"{"is_finished":false,"event_type":"text-generation","text":", world"}"#,
            r#"{"is_finished":true,"event_type":"stream-end","finish_reason":"COMPLETE"}"#,
        ]
        .join("\n");

        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let client = CohereClient::new("test-key", "command-r-plus").with_base_url(server.uri());
        let stream = client
            .chat_stream(&ChatRequest::new("command-r-plus", "Hi"))
            .await
            .unwrap();

        let events: Vec<StreamEvent> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::StreamStart,
                StreamEvent::TextGeneration { text: "Hello".to_string() },
                StreamEvent::TextGeneration { text: ", world".to_string() },
                StreamEvent::StreamEnd { finish_reason: Some("COMPLETE".to_string()) },
            ]
        );
    }

    #[test]
    fn test_line_buffer_joins_split_characters() {
        let line = "{\"event_type\":\"text-generation\",\"text\":\"café ☕\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&line[..split]).is_empty());
        let lines = buffer.push(&line[split..]);

        assert_eq!(lines.len(), 1);
        assert_eq!(
            parse_stream_line(&lines[0]).unwrap().unwrap(),
            StreamEvent::TextGeneration { text: "café ☕".to_string() }
        );
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_keeps_unterminated_tail() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"one\ntwo\nthr");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buffer.finish().as_deref(), Some("thr"));
    }

    /// Serve one chunked NDJSON response, pausing between chunks.
    async fn serve_chunks(chunks: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Read the whole request before answering.
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for chunk in chunks {
                socket
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await
                    .unwrap();
                socket.write_all(&chunk).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_chat_stream_character_split_across_chunks() {
        let line = "{\"event_type\":\"text-generation\",\"text\":\"café\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let base = serve_chunks(vec![line[..split].to_vec(), line[split..].to_vec()]).await;

        let client = CohereClient::new("test-key", "command-r-plus").with_base_url(base);
        let stream = client
            .chat_stream(&ChatRequest::new("command-r-plus", "Hi"))
            .await
            .unwrap();

        let events: Vec<StreamEvent> = stream.map(|e| e.unwrap()).collect().await;
        assert_eq!(
            events,
            vec![StreamEvent::TextGeneration { text: "café".to_string() }]
        );
    }
}
