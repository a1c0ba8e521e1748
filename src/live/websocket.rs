//! Live feed WebSocket connection

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::frame::ClientFrame;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct FeedSocket {
    stream: WsStream,
}

impl FeedSocket {
    /// Connect to the live feed endpoint. Auth travels in the URL query.
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!("Connecting live feed to {}", redact_token(url));

        let (stream, response) = connect_async(url)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("Live feed connected (status={})", response.status());

        Ok(Self { stream })
    }

    pub async fn send_frame(&mut self, frame: &ClientFrame) -> Result<()> {
        let text = frame.encode();
        tracing::debug!("WS send: {}", text);
        self.stream
            .send(Message::Text(text))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next text frame, answering pings.
    ///
    /// Returns `Ok(None)` once the server closes the connection.
    pub async fn recv_text(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }

    /// Close the connection, ignoring errors from an already-dead socket.
    pub async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close: {}", e);
        }
    }
}

/// Mask the token query parameter for logging.
fn redact_token(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return "(unparseable url)".to_string();
    };
    if !parsed.query_pairs().any(|(k, _)| k == "token") {
        return parsed.into();
    }

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".into() } else { v };
            (k.into_owned(), v.into_owned())
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.into()
}
