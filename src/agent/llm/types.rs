//! Cohere chat API wire types.

use serde::{Deserialize, Serialize};

/// Request body for `POST /v1/chat`.
#[derive(Debug, Serialize)]
pub struct CohereChatBody<'a> {
    pub model: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preamble: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chat_history: Vec<CohereTurn<'a>>,
    pub temperature: f32,
    pub stream: bool,
}

/// A history entry. Roles are `USER` or `CHATBOT`.
#[derive(Debug, Serialize)]
pub struct CohereTurn<'a> {
    pub role: &'static str,
    pub message: &'a str,
}

/// Non-streaming response. Only the text is used.
#[derive(Debug, Deserialize)]
pub struct CohereChatResponse {
    #[serde(default)]
    pub text: String,
}

/// One newline-delimited event of a streaming response.
#[derive(Debug, Deserialize)]
pub struct CohereStreamLine {
    pub event_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}
