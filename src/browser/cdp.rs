//! DevTools protocol client over a local WebSocket.
//!
//! Commands carry auto-incrementing ids and are correlated with their
//! responses. Events that arrive while a command is in flight are buffered so
//! a later [`CdpConnection::wait_for_event`] can still see them.

use std::collections::VecDeque;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::{render_err, Result};

/// An unsolicited protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, PartialEq)]
enum Incoming {
    Response {
        id: u64,
        outcome: std::result::Result<Value, String>,
    },
    Event(CdpEvent),
}

/// Classify one text frame.
fn parse_message(text: &str) -> Result<Incoming> {
    let mut message: Value = serde_json::from_str(text)
        .map_err(|e| render_err(format!("invalid DevTools message: {e}")))?;

    if let Some(id) = message.get("id").and_then(Value::as_u64) {
        let outcome = match message.get("error") {
            Some(error) => Err(error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string)),
            None => Ok(message.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
        };
        return Ok(Incoming::Response { id, outcome });
    }

    match message.get("method").and_then(Value::as_str) {
        Some(method) => Ok(Incoming::Event(CdpEvent {
            method: method.to_string(),
            params: message.get_mut("params").map(Value::take).unwrap_or(Value::Null),
        })),
        None => Err(render_err(format!("unrecognised DevTools message: {text}"))),
    }
}

/// One DevTools WebSocket session (browser- or page-level).
pub struct CdpConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
    next_id: u64,
    events: VecDeque<CdpEvent>,
}

impl CdpConnection {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| render_err(format!("DevTools connection to {url} failed: {e}")))?;
        debug!("DevTools connected: {} ({:?})", url, response.status());
        Ok(Self {
            stream,
            url: url.to_string(),
            next_id: 0,
            events: VecDeque::new(),
        })
    }

    /// Next text frame. Ping frames are answered; `None` once the peer closes.
    async fn recv_text(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.stream.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(render_err(format!("DevTools receive failed: {e}"))),
            }
        }
    }

    /// Read one message before `deadline`.
    async fn recv_before(&mut self, deadline: Instant, waiting_for: &str) -> Result<Incoming> {
        let text = match tokio::time::timeout_at(deadline, self.recv_text()).await {
            Ok(received) => received?,
            Err(_) => {
                return Err(render_err(format!(
                    "timed out waiting for {waiting_for} on {}",
                    self.url
                )))
            }
        };
        let text = text.ok_or_else(|| {
            render_err(format!("{} closed while waiting for {waiting_for}", self.url))
        })?;
        parse_message(&text)
    }

    /// Send a command and wait for its response.
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &mut self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R> {
        self.next_id += 1;
        let id = self.next_id;
        let request = serde_json::json!({
            "id": id,
            "method": method,
            "params": params,
        });
        self.stream
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| render_err(format!("failed to send {method}: {e}")))?;
        trace!("-> {} #{}", method, id);

        let deadline = Instant::now() + timeout;
        loop {
            match self.recv_before(deadline, method).await? {
                Incoming::Response { id: got, outcome } if got == id => {
                    let result = outcome.map_err(|e| render_err(format!("{method} failed: {e}")))?;
                    return serde_json::from_value(result)
                        .map_err(|e| render_err(format!("unexpected {method} result: {e}")));
                }
                Incoming::Response { id: stale, .. } => trace!("dropping stale response #{}", stale),
                Incoming::Event(event) => self.events.push_back(event),
            }
        }
    }

    /// Wait for the first event matching `predicate`, buffered or new.
    pub async fn wait_for_event<F>(&mut self, predicate: F, timeout: Duration) -> Result<CdpEvent>
    where
        F: Fn(&CdpEvent) -> bool,
    {
        if let Some(pos) = self.events.iter().position(&predicate) {
            if let Some(event) = self.events.remove(pos) {
                return Ok(event);
            }
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.recv_before(deadline, "event").await? {
                Incoming::Event(event) if predicate(&event) => return Ok(event),
                Incoming::Event(event) => self.events.push_back(event),
                Incoming::Response { .. } => {}
            }
        }
    }

    /// Forget buffered events.
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| render_err(format!("failed to close DevTools connection: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_success_response() {
        let msg = parse_message(r#"{"id": 4, "result": {"frameId": "F1"}}"#).unwrap();
        assert_eq!(
            msg,
            Incoming::Response {
                id: 4,
                outcome: Ok(json!({"frameId": "F1"})),
            }
        );
    }

    #[test]
    fn parses_error_response() {
        let msg = parse_message(r#"{"id": 2, "error": {"code": -32000, "message": "No target"}}"#).unwrap();
        assert_eq!(
            msg,
            Incoming::Response {
                id: 2,
                outcome: Err("No target".to_string()),
            }
        );
    }

    #[test]
    fn parses_event() {
        let msg = parse_message(
            r#"{"method": "Page.lifecycleEvent", "params": {"name": "load", "frameId": "F1"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Incoming::Event(CdpEvent {
                method: "Page.lifecycleEvent".to_string(),
                params: json!({"name": "load", "frameId": "F1"}),
            })
        );
    }

    #[test]
    fn response_without_result_is_null() {
        let msg = parse_message(r#"{"id": 9}"#).unwrap();
        assert_eq!(
            msg,
            Incoming::Response {
                id: 9,
                outcome: Ok(Value::Null),
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_message("not json").is_err());
        assert!(parse_message(r#"{"hello": 1}"#).is_err());
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_render_failure() {
        let err = CdpConnection::connect("ws://127.0.0.1:9/devtools/browser/none")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, crate::error::ExportError::Render(_)));
    }

    #[tokio::test]
    async fn unanswered_command_times_out_naming_the_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Read commands, never answer
            while let Some(Ok(_)) = ws.next().await {}
        });

        let url = format!("ws://{addr}/devtools/page/T1");
        let mut conn = CdpConnection::connect(&url).await.unwrap();
        let err = conn
            .call::<_, Value>("Page.enable", json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Page.enable"), "{message}");
        assert!(message.contains(&url), "{message}");

        let _ = conn.close().await;
        server.abort();
    }
}
