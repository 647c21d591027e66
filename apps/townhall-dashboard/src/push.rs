use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use townhall_events::DomainEvent;

/// One decoded message from the push stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// First message of a stream; carries no topic.
    Ready { connection_id: Option<String> },
    Event(DomainEvent),
}

impl PushMessage {
    /// Decodes one `data:` payload. Messages that are neither a ready marker
    /// nor carry a topic yield `Ok(None)`.
    pub fn parse(data: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_str(data)?;
        if value.get("ready").and_then(Value::as_bool) == Some(true) {
            let connection_id = value
                .get("connectionId")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(Some(PushMessage::Ready { connection_id }));
        }
        match value.get("topic") {
            Some(Value::String(topic)) if !topic.is_empty() => {
                serde_json::from_value(value).map(|ev| Some(PushMessage::Event(ev)))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push stream rejected the session")]
    Unauthorized,
    #[error("push stream answered {0}")]
    Status(StatusCode),
    #[error("push transport failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Lifecycle of the client's push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    Connecting,
    Open,
    Closed,
}

pub type PushStream = BoxStream<'static, Result<PushMessage, PushError>>;

/// Opens a push stream for the current session.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> Result<PushStream, PushError>;
}

/// Incremental `text/event-stream` decoder. Feeds raw chunks, returns the
/// `data` of every event completed by a blank line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: String,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let mut line = String::from_utf8_lossy(&raw).into_owned();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            if line.is_empty() {
                if !self.data.is_empty() {
                    out.push(std::mem::take(&mut self.data));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            }
            // event:, id: and retry: are not used by this stream.
        }
        out
    }
}

/// Connector for the server's SSE endpoint. The session token travels as a
/// query parameter, as browser event sources do.
#[derive(Debug, Clone)]
pub struct HttpPushConnector {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl HttpPushConnector {
    pub const STREAM_PATH: &'static str = "/api/events/stream";

    pub fn new(client: reqwest::Client, base: &str, token: Option<String>) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[async_trait]
impl PushConnector for HttpPushConnector {
    async fn connect(&self) -> Result<PushStream, PushError> {
        let mut req = self
            .client
            .get(format!("{}{}", self.base, Self::STREAM_PATH))
            .header(ACCEPT, "text/event-stream");
        if let Some(token) = self.token.as_deref() {
            req = req.query(&[("token", token.trim())]);
        }
        let resp = req.send().await?;
        match resp.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(PushError::Unauthorized),
            other => return Err(PushError::Status(other)),
        }

        let mut decoder = SseDecoder::default();
        let messages = resp
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder
                    .feed(&bytes)
                    .into_iter()
                    .filter_map(|data| match PushMessage::parse(&data) {
                        Ok(msg) => msg.map(Ok),
                        Err(err) => {
                            tracing::warn!(%err, "skipping malformed push message");
                            None
                        }
                    })
                    .collect::<Vec<_>>(),
                Err(err) => vec![Err(PushError::Transport(err))],
            })
            .flat_map(stream::iter);
        Ok(messages.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use townhall_events::Action;

    #[test]
    fn decoder_handles_split_chunks_and_comments() {
        let mut dec = SseDecoder::default();
        assert!(dec.feed(b"data: {\"ready\":tr").is_empty());
        let out = dec.feed(b"ue}\r\n\r\n:keep-alive\n\ndata:{\"topic\":\"events\"}\n");
        assert_eq!(out, vec!["{\"ready\":true}".to_string()]);
        let out = dec.feed(b"\n");
        assert_eq!(out, vec!["{\"topic\":\"events\"}".to_string()]);
    }

    #[test]
    fn decoder_joins_multiline_data() {
        let mut dec = SseDecoder::default();
        let out = dec.feed(b"id: 4\ndata: a\ndata: b\n\n");
        assert_eq!(out, vec!["a\nb".to_string()]);
    }

    #[test]
    fn parse_distinguishes_ready_events_and_noise() {
        let ready = PushMessage::parse(r#"{"ready":true,"connectionId":"c-1"}"#).expect("json");
        assert_eq!(
            ready,
            Some(PushMessage::Ready {
                connection_id: Some("c-1".into())
            })
        );

        let ev = PushMessage::parse(
            r#"{"topic":"residents","action":"create","id":9,"payload":{},"emittedAt":"t"}"#,
        )
        .expect("json");
        match ev {
            Some(PushMessage::Event(ev)) => {
                assert_eq!(ev.topic, "residents");
                assert_eq!(ev.action, Action::Create);
                assert_eq!(ev.id, "9");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(PushMessage::parse(r#"{"hello":1}"#).expect("json"), None);
        assert!(PushMessage::parse("not json").is_err());
    }
}
