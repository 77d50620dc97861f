//! Minimal OpenAI-compatible Chat Completions client: POST a chat request,
//! consume the response as Server-Sent Events, and return the concatenated
//! assistant content. Modeled on the Chat Completions SSE consumer the
//! teacher uses (`process_chat_sse`), pared down to plain content
//! concatenation since this wire format has no function-calling schema --
//! tool calls are expressed in the model's Markdown prose instead.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::json;

use crate::error::DevError;
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Stream a completion for `messages` (role, content pairs in order,
    /// the first being the system prompt) and return the fully
    /// concatenated assistant content. `silent` has no behavioral effect
    /// here; callers use it to decide whether to render a streaming
    /// spinner.
    pub async fn stream_completion(
        &self,
        messages: &[(String, String)],
        silent: bool,
    ) -> Result<String> {
        let _ = silent;
        let payload_messages: Vec<ChatMessage> = messages
            .iter()
            .map(|(role, content)| ChatMessage { role, content })
            .collect();
        let payload = json!({
            "model": self.model,
            "messages": payload_messages,
            "stream": true,
        });

        let url = format!("{}/chat/completions", self.api_url.trim_end_matches('/'));
        let mut req = self.http.post(&url).header(reqwest::header::ACCEPT, "text/event-stream");
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        tracing::debug!(url = %url, model = %self.model, "posting chat completion");
        let response = req.json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "chat completions returned non-success status");
            return Err(DevError::UnexpectedStatus(status, body));
        }

        let stream = response.bytes_stream().map_err(DevError::Reqwest);
        consume_sse(stream).await
    }
}

async fn consume_sse<S>(stream: S) -> Result<String>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut events = stream.eventsource();
    let mut content = String::new();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| DevError::Stream(e.to_string()))?;
        let data = event.data.trim();
        if data == "[DONE]" {
            break;
        }
        let chunk: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if let Some(delta) = chunk
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
        {
            content.push_str(delta);
        }
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    #[tokio::test]
    async fn concatenates_streamed_delta_content() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello, \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = LlmClient::new(server.uri(), "", "test-model");
        let messages = vec![("system".to_string(), "sys".to_string())];
        let result = client.stream_completion(&messages, false).await.expect("stream");
        assert_eq!(result, "Hello, world");
    }

    #[tokio::test]
    async fn non_2xx_surfaces_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = LlmClient::new(server.uri(), "", "test-model");
        let messages = vec![("system".to_string(), "sys".to_string())];
        let result = client.stream_completion(&messages, false).await;
        assert!(matches!(result, Err(DevError::UnexpectedStatus(_, _))));
    }
}
