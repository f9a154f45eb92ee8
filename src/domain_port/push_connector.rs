use crate::domain_model::*;
use tokio::sync::mpsc::{Receiver, Sender};
use url::Url;

// region conn message

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

// endregion

// region conn sender

#[async_trait::async_trait]
pub trait ConnSender: Send + Sync {
    async fn send(&mut self, message: ConnMessage) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl ConnSender for Sender<ConnMessage> {
    async fn send(&mut self, message: ConnMessage) -> anyhow::Result<()> {
        Sender::<ConnMessage>::send(self, message).await?;
        Ok(())
    }
}

// endregion

// region conn receiver

#[async_trait::async_trait]
pub trait ConnReceiver: Send + Sync {
    async fn next(&mut self) -> Option<anyhow::Result<ConnMessage>>;
}

#[async_trait::async_trait]
impl ConnReceiver for Receiver<ConnMessage> {
    async fn next(&mut self) -> Option<anyhow::Result<ConnMessage>> {
        Some(Ok(Receiver::<ConnMessage>::recv(&mut *self).await?))
    }
}

// endregion

pub struct PushLink {
    pub sender: Box<dyn ConnSender>,
    pub receiver: Box<dyn ConnReceiver>,
}

/// Opens an authenticated push connection.
#[async_trait::async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &Url, token: &AccessToken) -> anyhow::Result<PushLink>;
}
