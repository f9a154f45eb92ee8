use crate::domain_model::*;
use crate::domain_port::*;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl From<Message> for ConnMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(t) => ConnMessage::Text(t),
            Message::Ping(payload) => ConnMessage::Ping(payload),
            Message::Pong(payload) => ConnMessage::Pong(payload),
            Message::Close(_) => ConnMessage::Close,
            other => ConnMessage::Binary(other.into_data()),
        }
    }
}

impl From<ConnMessage> for Message {
    fn from(message: ConnMessage) -> Message {
        match message {
            ConnMessage::Text(t) => Message::Text(t),
            ConnMessage::Binary(b) => Message::Binary(b),
            ConnMessage::Ping(payload) => Message::Ping(payload),
            ConnMessage::Pong(payload) => Message::Pong(payload),
            ConnMessage::Close => Message::Close(None),
        }
    }
}

#[async_trait::async_trait]
impl ConnSender for SplitSink<WsStream, Message> {
    async fn send(&mut self, message: ConnMessage) -> anyhow::Result<()> {
        SinkExt::send(self, Message::from(message)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConnReceiver for SplitStream<WsStream> {
    async fn next(&mut self) -> Option<anyhow::Result<ConnMessage>> {
        StreamExt::next(self)
            .await
            .map(|result| result.map(ConnMessage::from).map_err(anyhow::Error::from))
    }
}

/// WebSocket transport. The access token rides on the upgrade request as a
/// bearer header.
#[derive(Debug, Default)]
pub struct WsPushConnector;

impl WsPushConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl PushConnector for WsPushConnector {
    async fn connect(&self, url: &Url, token: &AccessToken) -> anyhow::Result<PushLink> {
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.0))?,
        );

        let (stream, response) = connect_async(request).await?;
        tracing::debug!(status = ?response.status(), %url, "websocket upgraded");

        let (sink, stream) = stream.split();
        Ok(PushLink {
            sender: Box::new(sink),
            receiver: Box::new(stream),
        })
    }
}
